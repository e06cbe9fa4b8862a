//! Backing store abstraction
//!
//! The cache layer never talks to a network client directly. Everything it
//! needs from the shared key-value system is expressed by [`BackingStore`],
//! which mirrors the small Redis-like command surface the layer relies on:
//! string get/set with TTL, conditional create for locks, set membership,
//! pipelined multi-command execution, and a few introspection calls.
//!
//! Connection management and reconnection belong to the implementation.
//! [`InMemoryStore`] is a single-node implementation used in tests and for
//! embedded deployments.

pub mod memory;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use memory::InMemoryStore;

/// A single write command that can be sent inside a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `SETEX key ttl value`
    SetEx {
        key: String,
        value: String,
        ttl: Duration,
    },

    /// `DEL key...`
    Del { keys: Vec<String> },

    /// `SADD key member...`
    SAdd { key: String, members: Vec<String> },

    /// `SREM key member...`
    SRem { key: String, members: Vec<String> },

    /// `EXPIRE key ttl`
    Expire { key: String, ttl: Duration },
}

impl Command {
    /// Command name, used for logging
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetEx { .. } => "SETEX",
            Command::Del { .. } => "DEL",
            Command::SAdd { .. } => "SADD",
            Command::SRem { .. } => "SREM",
            Command::Expire { .. } => "EXPIRE",
        }
    }
}

/// Reply to a pipelined command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Status reply (`+OK`)
    Ok,

    /// Integer reply (number of keys/members affected, or 0/1 flags)
    Integer(i64),
}

/// Remaining lifetime of a key, as reported by `TTL`/`PTTL`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist
    Missing,

    /// Key exists without an expiry
    Persistent,

    /// Key expires after the given duration
    Expires(Duration),
}

/// Command surface of the shared key-value store
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// `GET key`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// `SET key value` without expiry
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// `SETEX key ttl value`
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// `SET key value PX ttl NX`
    ///
    /// Returns `true` if the key was created, `false` if it already existed.
    async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Atomically delete `key` only if its value equals `expected`
    ///
    /// Redis implementations run this as a server-side script.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool>;

    /// `DEL key...`, returns the number of keys removed
    async fn del(&self, keys: &[String]) -> Result<u64>;

    /// `SADD key member...`
    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64>;

    /// `SREM key member...`
    async fn srem(&self, key: &str, members: &[String]) -> Result<u64>;

    /// `SMEMBERS key`
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    /// `EXPIRE key ttl`
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// `PTTL key`
    async fn ttl(&self, key: &str) -> Result<KeyTtl>;

    /// `KEYS pattern` (diagnostics only)
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// `DBSIZE`
    async fn dbsize(&self) -> Result<u64>;

    /// Human readable memory usage (`INFO memory` / `used_memory_human`)
    async fn memory_usage(&self) -> Result<Option<String>>;

    /// `PING`
    async fn ping(&self) -> Result<()>;

    /// Execute a single pipelined command
    async fn execute(&self, command: Command) -> Result<Reply> {
        match command {
            Command::SetEx { key, value, ttl } => {
                self.set_ex(&key, &value, ttl).await?;
                Ok(Reply::Ok)
            }
            Command::Del { keys } => Ok(Reply::Integer(self.del(&keys).await? as i64)),
            Command::SAdd { key, members } => {
                Ok(Reply::Integer(self.sadd(&key, &members).await? as i64))
            }
            Command::SRem { key, members } => {
                Ok(Reply::Integer(self.srem(&key, &members).await? as i64))
            }
            Command::Expire { key, ttl } => {
                Ok(Reply::Integer(self.expire(&key, ttl).await? as i64))
            }
        }
    }

    /// Execute several commands as one pipeline
    ///
    /// One result per command, in order. A failing command does not stop the
    /// ones after it and nothing is rolled back. Implementations with a
    /// transactional primitive (`MULTI`/`EXEC`) should override this.
    async fn pipeline(&self, commands: Vec<Command>) -> Vec<Result<Reply>> {
        let mut results = Vec::with_capacity(commands.len());
        for command in commands {
            results.push(self.execute(command).await);
        }
        results
    }
}

/// Glob matching for `KEYS` patterns (`*` and `?`)
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();

    let (mut p, mut k) = (0, 0);
    let mut star: Option<usize> = None;
    let mut star_k = 0;

    while k < key.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == key[k]) {
            p += 1;
            k += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            star_k = k;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            star_k += 1;
            k = star_k;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }

    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("cache:tag:*", "cache:tag:users"));
        assert!(!glob_match("cache:tag:*", "cache:entry:users"));
        assert!(glob_match("cache:*:42", "cache:entry:42"));
        assert!(glob_match("job:?", "job:1"));
        assert!(!glob_match("job:?", "job:12"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }

    #[test]
    fn test_command_name() {
        let cmd = Command::Del {
            keys: vec!["a".to_string()],
        };
        assert_eq!(cmd.name(), "DEL");

        let cmd = Command::Expire {
            key: "a".to_string(),
            ttl: Duration::from_secs(1),
        };
        assert_eq!(cmd.name(), "EXPIRE");
    }
}
