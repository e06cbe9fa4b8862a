//! In-memory backing store with native TTL support

use super::{glob_match, BackingStore, Command, KeyTtl, Reply};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(HashSet<String>),
}

impl Value {
    fn approx_size(&self) -> usize {
        match self {
            Value::Str(s) => s.len(),
            Value::Set(members) => members.iter().map(|m| m.len()).sum(),
        }
    }
}

#[derive(Debug, Clone)]
struct Record {
    value: Value,
    expires_at: Option<Instant>,
}

impl Record {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

#[derive(Debug, Default)]
struct Keyspace {
    records: HashMap<String, Record>,
}

impl Keyspace {
    /// Drop the record if its TTL has passed, then return it
    fn live(&mut self, key: &str) -> Option<&mut Record> {
        let now = Instant::now();
        if self.records.get(key).map(|r| r.is_expired(now)).unwrap_or(false) {
            self.records.remove(key);
        }
        self.records.get_mut(key)
    }

    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.records.retain(|_, record| !record.is_expired(now));
    }

    fn set_string(&mut self, key: &str, value: &str, ttl: Option<Duration>) {
        self.records.insert(
            key.to_string(),
            Record {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    fn get_string(&mut self, key: &str) -> Result<Option<String>> {
        match self.live(key) {
            None => Ok(None),
            Some(Record {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn del(&mut self, keys: &[String]) -> u64 {
        let mut removed = 0;
        for key in keys {
            if self.live(key).is_some() {
                self.records.remove(key);
                removed += 1;
            }
        }
        removed
    }

    fn sadd(&mut self, key: &str, members: &[String]) -> Result<u64> {
        if self.live(key).is_none() {
            self.records.insert(
                key.to_string(),
                Record {
                    value: Value::Set(HashSet::new()),
                    expires_at: None,
                },
            );
        }

        match self.records.get_mut(key) {
            Some(Record {
                value: Value::Set(set),
                ..
            }) => Ok(members
                .iter()
                .filter(|m| set.insert((*m).clone()))
                .count() as u64),
            _ => Err(wrong_type(key)),
        }
    }

    fn srem(&mut self, key: &str, members: &[String]) -> Result<u64> {
        let (removed, now_empty) = match self.live(key) {
            None => return Ok(0),
            Some(Record {
                value: Value::Set(set),
                ..
            }) => {
                let removed = members.iter().filter(|m| set.remove(m.as_str())).count() as u64;
                (removed, set.is_empty())
            }
            Some(_) => return Err(wrong_type(key)),
        };

        // Redis drops empty sets
        if now_empty {
            self.records.remove(key);
        }
        Ok(removed)
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> bool {
        match self.live(key) {
            Some(record) => {
                record.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        }
    }

    fn apply(&mut self, command: Command) -> Result<Reply> {
        match command {
            Command::SetEx { key, value, ttl } => {
                self.set_string(&key, &value, Some(ttl));
                Ok(Reply::Ok)
            }
            Command::Del { keys } => Ok(Reply::Integer(self.del(&keys) as i64)),
            Command::SAdd { key, members } => Ok(Reply::Integer(self.sadd(&key, &members)? as i64)),
            Command::SRem { key, members } => Ok(Reply::Integer(self.srem(&key, &members)? as i64)),
            Command::Expire { key, ttl } => Ok(Reply::Integer(self.expire(&key, ttl) as i64)),
        }
    }
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::Store(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {}",
        key
    ))
}

fn human_bytes(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["B", "K", "M", "G"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{}{}", bytes, UNITS[0])
    } else {
        format!("{:.2}{}", value, UNITS[unit])
    }
}

/// Single-node store holding strings and sets in process memory
///
/// Expiry is enforced lazily on access, the way Redis does for keys that are
/// touched. Pipelines run under one lock, so they are applied atomically.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    keyspace: Mutex<Keyspace>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BackingStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.keyspace.lock().await.get_string(key)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.keyspace.lock().await.set_string(key, value, None);
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.keyspace.lock().await.set_string(key, value, Some(ttl));
        Ok(())
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut keyspace = self.keyspace.lock().await;
        if keyspace.live(key).is_some() {
            return Ok(false);
        }
        keyspace.set_string(key, value, Some(ttl));
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let mut keyspace = self.keyspace.lock().await;
        match keyspace.get_string(key)? {
            Some(current) if current == expected => {
                keyspace.records.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        Ok(self.keyspace.lock().await.del(keys))
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64> {
        self.keyspace.lock().await.sadd(key, members)
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<u64> {
        self.keyspace.lock().await.srem(key, members)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut keyspace = self.keyspace.lock().await;
        match keyspace.live(key) {
            None => Ok(Vec::new()),
            Some(Record {
                value: Value::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        Ok(self.keyspace.lock().await.expire(key, ttl))
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        let mut keyspace = self.keyspace.lock().await;
        Ok(match keyspace.live(key) {
            None => KeyTtl::Missing,
            Some(Record {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(Record {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expires(at.saturating_duration_since(Instant::now())),
        })
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut keyspace = self.keyspace.lock().await;
        keyspace.purge_expired();
        Ok(keyspace
            .records
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect())
    }

    async fn dbsize(&self) -> Result<u64> {
        let mut keyspace = self.keyspace.lock().await;
        keyspace.purge_expired();
        Ok(keyspace.records.len() as u64)
    }

    async fn memory_usage(&self) -> Result<Option<String>> {
        let mut keyspace = self.keyspace.lock().await;
        keyspace.purge_expired();
        let bytes: usize = keyspace
            .records
            .iter()
            .map(|(k, r)| k.len() + r.value.approx_size())
            .sum();
        Ok(Some(human_bytes(bytes)))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn pipeline(&self, commands: Vec<Command>) -> Vec<Result<Reply>> {
        let mut keyspace = self.keyspace.lock().await;
        debug!("Applying pipeline of {} commands", commands.len());
        commands
            .into_iter()
            .map(|command| keyspace.apply(command))
            .collect()
    }
}
