use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::broadcast;

use super::{
    content_digest, event_channel, recency_cutoff, sort_newest_first, validate_key, ObjectCreated,
    ObjectMetadata, ObjectStore, ObjectSummary, StoreError, StoredObject, DIGEST_METADATA_KEY,
};

/// In-memory implementation for development and testing
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    events: broadcast::Sender<ObjectCreated>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            events: event_channel(),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .read()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        mut metadata: ObjectMetadata,
    ) -> Result<(), StoreError> {
        validate_key(key)?;
        metadata.insert(DIGEST_METADATA_KEY.into(), content_digest(&bytes));

        let object = StoredObject {
            key: key.to_string(),
            bytes,
            content_type: content_type.to_string(),
            metadata,
            last_modified: Utc::now(),
        };

        {
            let mut objects = self
                .objects
                .write()
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            objects.insert(key.to_string(), object);
        }

        // No subscriber is not an error; the object itself is the source of truth.
        let _ = self.events.send(ObjectCreated { key: key.to_string() });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<StoredObject, StoreError> {
        let objects = self
            .objects
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str, recency: Option<Duration>) -> Result<Vec<ObjectSummary>, StoreError> {
        let cutoff = recency_cutoff(recency);
        let objects = self
            .objects
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        let mut summaries: Vec<ObjectSummary> = objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, object)| cutoff.map_or(true, |cutoff| object.last_modified >= cutoff))
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                last_modified: object.last_modified,
                metadata: object.metadata.clone(),
            })
            .collect();
        sort_newest_first(&mut summaries);
        Ok(summaries)
    }

    fn subscribe(&self) -> broadcast::Receiver<ObjectCreated> {
        self.events.subscribe()
    }
}
