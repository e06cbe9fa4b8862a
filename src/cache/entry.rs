//! Versioned cache entries with integrity checksums

use crate::cache::types::CacheKey;
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Content hash of a payload (lowercase hex SHA-256)
pub fn checksum(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

/// A cache entry as stored in the backing store
///
/// The payload is the JSON encoding of the caller's value. It is kept as a
/// string so the checksum is computed over exactly the bytes that are stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cache key
    pub key: CacheKey,

    /// Serialized value
    pub payload: String,

    /// Entry metadata
    pub metadata: CacheMetadata,
}

impl CacheEntry {
    /// Create an entry for an already serialized payload
    pub fn new(
        key: CacheKey,
        payload: String,
        version: u64,
        tags: Vec<String>,
        dependencies: Vec<String>,
    ) -> Self {
        let checksum = checksum(&payload);

        Self {
            key,
            payload,
            metadata: CacheMetadata {
                version,
                timestamp: Utc::now(),
                checksum,
                tags: dedup(tags),
                dependencies: dedup(dependencies),
            },
        }
    }

    /// Recompute the checksum and compare it with the stored one
    pub fn verify(&self) -> bool {
        checksum(&self.payload) == self.metadata.checksum
    }

    /// Fail with `Integrity` if the payload does not match its checksum
    pub fn ensure_integrity(&self) -> Result<()> {
        if self.verify() {
            Ok(())
        } else {
            Err(CacheError::Integrity {
                key: self.key.clone(),
            })
        }
    }

    /// Encode the whole entry as the document written to the store
    pub fn to_document(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a stored document
    pub fn from_document(document: &str) -> Result<Self> {
        Ok(serde_json::from_str(document)?)
    }
}

/// Metadata associated with a cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Version number from the writing process's counter
    pub version: u64,

    /// When the entry was written
    pub timestamp: DateTime<Utc>,

    /// Hex SHA-256 of the payload
    pub checksum: String,

    /// Tags for bulk invalidation
    pub tags: Vec<String>,

    /// Keys this entry depends on
    pub dependencies: Vec<String>,
}

fn dedup(mut items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_stable() {
        assert_eq!(checksum("abc"), checksum("abc"));
        assert_ne!(checksum("abc"), checksum("abd"));
        assert_eq!(
            checksum("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_cache_entry_creation() {
        let entry = CacheEntry::new(
            "job:42".to_string(),
            r#"{"title":"X"}"#.to_string(),
            7,
            vec!["jobs".to_string(), "jobs".to_string()],
            vec!["company:1".to_string()],
        );

        assert_eq!(entry.key, "job:42");
        assert_eq!(entry.metadata.version, 7);
        assert_eq!(entry.metadata.tags, vec!["jobs".to_string()]);
        assert_eq!(entry.metadata.dependencies, vec!["company:1".to_string()]);
        assert!(entry.verify());
    }

    #[test]
    fn test_tampered_payload_fails_verification() {
        let mut entry = CacheEntry::new("k".to_string(), r#"{"n":1}"#.to_string(), 1, vec![], vec![]);
        entry.payload = r#"{"n":2}"#.to_string();

        assert!(!entry.verify());
        assert!(matches!(
            entry.ensure_integrity(),
            Err(CacheError::Integrity { .. })
        ));
    }

    #[test]
    fn test_document_round_trip_keeps_checksum() {
        let entry = CacheEntry::new(
            "k".to_string(),
            "[1,2,3]".to_string(),
            3,
            vec!["t".to_string()],
            vec![],
        );

        let document = entry.to_document().unwrap();
        let parsed = CacheEntry::from_document(&document).unwrap();

        assert_eq!(parsed, entry);
        assert!(parsed.verify());
    }

    #[test]
    fn test_invalid_document() {
        assert!(CacheEntry::from_document("not json").is_err());
    }
}
