//! Durable object storage.
//!
//! Two logical areas live under one store, separated by key prefix (see
//! [`crate::keys::KeyLayout`]). Every `put` replaces the whole object
//! atomically and announces the key on the creation-event channel.

mod fs;
mod memory;

pub use fs::FsObjectStore;
pub use memory::InMemoryObjectStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const DIGEST_METADATA_KEY: &str = "content-sha256";

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

pub type ObjectMetadata = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub metadata: ObjectMetadata,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub metadata: ObjectMetadata,
}

/// Notification delivered after an object has been written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectCreated {
    pub key: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: ObjectMetadata,
    ) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<StoredObject, StoreError>;

    /// Objects under `prefix`, newest first. `recency` limits the listing to
    /// objects modified within that window.
    async fn list(&self, prefix: &str, recency: Option<Duration>) -> Result<Vec<ObjectSummary>, StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<ObjectCreated>;
}

pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub(crate) fn event_channel() -> broadcast::Sender<ObjectCreated> {
    let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    tx
}

pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if invalid {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

pub(crate) fn recency_cutoff(recency: Option<Duration>) -> Option<DateTime<Utc>> {
    let window = chrono::Duration::from_std(recency?).ok()?;
    Utc::now().checked_sub_signed(window)
}

pub(crate) fn sort_newest_first(summaries: &mut [ObjectSummary]) {
    summaries.sort_by(|a, b| b.last_modified.cmp(&a.last_modified).then_with(|| a.key.cmp(&b.key)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_hex_sha256() {
        assert_eq!(
            content_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn rejects_traversal_keys() {
        assert!(validate_key("jobs/a.json").is_ok());
        assert!(validate_key("../a.json").is_err());
        assert!(validate_key("jobs//a.json").is_err());
        assert!(validate_key("/abs.json").is_err());
        assert!(validate_key("").is_err());
    }

    #[test]
    fn no_window_means_no_cutoff() {
        assert!(recency_cutoff(None).is_none());
        let cutoff = recency_cutoff(Some(Duration::from_secs(3600))).unwrap();
        assert!(cutoff < Utc::now());
    }
}
