//! Backing-store key layout

/// Maps logical cache keys and tags to backing-store keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    prefix: String,
}

impl KeyLayout {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn entry(&self, key: &str) -> String {
        format!("{}entry:{}", self.prefix, key)
    }

    pub fn version(&self, key: &str) -> String {
        format!("{}version:{}", self.prefix, key)
    }

    pub fn tag(&self, tag: &str) -> String {
        format!("{}tag:{}", self.prefix, tag)
    }

    /// Per-key lock; kept apart from the `tags:` and `batch:` lock segments
    pub fn lock(&self, key: &str) -> String {
        format!("{}lock:key:{}", self.prefix, key)
    }

    /// Lock covering one batch, identified by a digest of its keys
    pub fn batch_lock(&self, digest: &str) -> String {
        format!("{}lock:batch:{}", self.prefix, digest)
    }

    /// Lock covering a group of tags; order of `tags` does not matter
    pub fn tags_lock(&self, tags: &[String]) -> String {
        let mut sorted: Vec<&str> = tags.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        sorted.dedup();
        format!("{}lock:tags:{}", self.prefix, sorted.join(","))
    }

    pub fn tag_pattern(&self) -> String {
        format!("{}tag:*", self.prefix)
    }

    pub fn lock_pattern(&self) -> String {
        format!("{}lock:*", self.prefix)
    }
}
