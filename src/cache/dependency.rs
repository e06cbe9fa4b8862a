//! In-memory dependency graph
//!
//! Maps a dependency key to the keys that declared it. The graph is derived
//! state local to one process: it is never persisted, grows as entries are
//! set, and is reset wholesale once it holds more than `max_entries` sources.

use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// `dependency -> dependents` mapping
pub struct DependencyGraph {
    edges: RwLock<HashMap<String, HashSet<String>>>,
    max_entries: usize,
}

impl DependencyGraph {
    pub fn new(max_entries: usize) -> Self {
        Self {
            edges: RwLock::new(HashMap::new()),
            max_entries,
        }
    }

    /// Record that `key` depends on each of `dependencies`
    pub async fn register(&self, key: &str, dependencies: &[String]) {
        if dependencies.is_empty() {
            return;
        }

        let mut edges = self.edges.write().await;
        if edges.len() >= self.max_entries {
            warn!(
                "Dependency graph reached {} sources, resetting",
                edges.len()
            );
            edges.clear();
        }

        for dependency in dependencies {
            if dependency == key {
                continue;
            }
            edges
                .entry(dependency.clone())
                .or_default()
                .insert(key.to_string());
        }
        debug!("Registered {} dependencies for {}", dependencies.len(), key);
    }

    /// Direct dependents of `key`
    pub async fn dependents(&self, key: &str) -> Vec<String> {
        let edges = self.edges.read().await;
        edges
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Direct dependents of any key in `keys` (one hop, not transitive)
    pub async fn dependents_of<'a, I>(&self, keys: I) -> HashSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let edges = self.edges.read().await;
        keys.into_iter()
            .filter_map(|key| edges.get(key))
            .flat_map(|set| set.iter().cloned())
            .collect()
    }

    /// Remove `key` both as a dependency source and as a dependent
    pub async fn remove(&self, key: &str) {
        let mut edges = self.edges.write().await;
        Self::remove_locked(&mut edges, key);
    }

    /// Remove several keys under one write lock
    pub async fn remove_all<'a, I>(&self, keys: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut edges = self.edges.write().await;
        for key in keys {
            Self::remove_locked(&mut edges, key);
        }
    }

    fn remove_locked(edges: &mut HashMap<String, HashSet<String>>, key: &str) {
        edges.remove(key);
        edges.retain(|_, dependents| {
            dependents.remove(key);
            !dependents.is_empty()
        });
    }

    /// Number of dependency sources tracked
    pub async fn len(&self) -> usize {
        self.edges.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.edges.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.edges.write().await.clear();
    }
}
