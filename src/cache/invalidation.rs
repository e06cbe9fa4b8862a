//! Tag and dependency driven invalidation
//!
//! Invalidation resolves a closure of keys from a set of tags:
//! - every member of each tag's index set
//! - the tag index sets themselves
//! - optionally, the direct dependents of the resolved keys (one hop)
//!
//! and deletes it in pipelined batches. A failing command is logged and
//! counted; it never aborts the rest of the batch.

use crate::backend::{BackingStore, Command};
use crate::cache::dependency::DependencyGraph;
use crate::cache::keys::KeyLayout;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Reason for cache invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Explicit delete by key
    Manual,

    /// Invalidated by tag match
    TagMatch { tags: Vec<String> },

    /// Checksum mismatch detected on read
    Integrity,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Manual => write!(f, "manual invalidation"),
            InvalidationReason::TagMatch { tags } => write!(f, "tag match: {}", tags.join(",")),
            InvalidationReason::Integrity => write!(f, "integrity check failed"),
        }
    }
}

/// Event for cache invalidation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Reason for invalidation
    pub reason: InvalidationReason,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Logical keys that were invalidated
    pub keys: Vec<String>,

    /// Additional context
    pub context: Option<String>,
}

impl InvalidationEvent {
    /// Create a new invalidation event
    pub fn new(reason: InvalidationReason, keys: Vec<String>) -> Self {
        Self {
            reason,
            timestamp: Utc::now(),
            keys,
            context: None,
        }
    }

    /// Add context to the event
    pub fn with_context(mut self, context: String) -> Self {
        self.context = Some(context);
        self
    }
}

/// Result of one invalidation pass
#[derive(Debug, Clone)]
pub struct InvalidationOutcome {
    pub event: InvalidationEvent,

    /// Backing-store keys targeted by DEL commands
    pub deleted_store_keys: usize,

    /// Commands that failed (lookups and deletes)
    pub failed_commands: usize,
}

impl InvalidationOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed_commands == 0
    }
}

/// Resolves and deletes invalidation closures
pub struct InvalidationEngine {
    store: Arc<dyn BackingStore>,
    layout: KeyLayout,
    graph: Arc<DependencyGraph>,
}

impl InvalidationEngine {
    pub fn new(store: Arc<dyn BackingStore>, layout: KeyLayout, graph: Arc<DependencyGraph>) -> Self {
        Self {
            store,
            layout,
            graph,
        }
    }

    /// Logical keys indexed under any of `tags`
    ///
    /// Returns the keys and the number of tag lookups that failed.
    pub async fn resolve_tags(&self, tags: &[String]) -> (BTreeSet<String>, usize) {
        let mut keys = BTreeSet::new();
        let mut failures = 0;

        for tag in tags {
            match self.store.smembers(&self.layout.tag(tag)).await {
                Ok(members) => keys.extend(members),
                Err(e) => {
                    error!("Failed to read tag index {}: {}", tag, e);
                    failures += 1;
                }
            }
        }

        (keys, failures)
    }

    /// Invalidate everything reachable from `tags`
    pub async fn invalidate(
        &self,
        tags: &[String],
        cascade_dependencies: bool,
        batch_size: usize,
    ) -> InvalidationOutcome {
        let (mut keys, mut failed_commands) = self.resolve_tags(tags).await;
        let direct = keys.len();

        if cascade_dependencies {
            let dependents = self.graph.dependents_of(keys.iter()).await;
            keys.extend(dependents);
        }

        let mut store_keys: Vec<String> = Vec::with_capacity(keys.len() * 2 + tags.len());
        for key in &keys {
            store_keys.push(self.layout.entry(key));
            store_keys.push(self.layout.version(key));
        }
        store_keys.extend(tags.iter().map(|tag| self.layout.tag(tag)));

        failed_commands += self.delete_in_batches(&store_keys, batch_size).await;
        self.graph.remove_all(keys.iter()).await;

        let keys: Vec<String> = keys.into_iter().collect();
        let event = InvalidationEvent::new(
            InvalidationReason::TagMatch {
                tags: tags.to_vec(),
            },
            keys.clone(),
        )
        .with_context(format!(
            "{} tagged, {} via dependencies",
            direct,
            keys.len() - direct
        ));

        info!(
            "Invalidated {} keys for tags [{}] ({})",
            keys.len(),
            tags.join(","),
            event.context.as_deref().unwrap_or_default()
        );

        InvalidationOutcome {
            event,
            deleted_store_keys: store_keys.len(),
            failed_commands,
        }
    }

    /// Delete `store_keys` with one pipeline per chunk of `batch_size`
    ///
    /// Returns the number of failed commands.
    pub async fn delete_in_batches(&self, store_keys: &[String], batch_size: usize) -> usize {
        let mut failures = 0;

        for (index, chunk) in store_keys.chunks(batch_size.max(1)).enumerate() {
            let commands: Vec<Command> = chunk
                .iter()
                .map(|key| Command::Del {
                    keys: vec![key.clone()],
                })
                .collect();

            let results = self.store.pipeline(commands).await;
            for (key, result) in chunk.iter().zip(results) {
                if let Err(e) = result {
                    error!("DEL {} failed during invalidation: {}", key, e);
                    failures += 1;
                }
            }
            debug!("Invalidation batch {} done ({} keys)", index, chunk.len());
        }

        failures
    }
}
