use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use log::warn;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;

use super::{
    content_digest, event_channel, recency_cutoff, sort_newest_first, validate_key, ObjectCreated,
    ObjectMetadata, ObjectStore, ObjectSummary, StoreError, StoredObject, DIGEST_METADATA_KEY,
};

const META_DIR: &str = ".meta";
const TEMP_PREFIX: &str = ".tmp-";
const CONSISTENT_READ_ATTEMPTS: usize = 3;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    content_type: String,
    metadata: ObjectMetadata,
}

/// Directory-backed store. Objects live at `<root>/<key>`; content type and
/// metadata live in a sidecar under `<root>/.meta/`.
pub struct FsObjectStore {
    root: PathBuf,
    events: broadcast::Sender<ObjectCreated>,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join(META_DIR))?;
        Ok(Self {
            root,
            events: event_channel(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        sidecar_path_in(&self.root, key)
    }
}

fn sidecar_path_in(root: &Path, key: &str) -> PathBuf {
    root.join(META_DIR).join(format!("{key}.meta.json"))
}

/// Writes to a uniquely named sibling temp file and renames it over the
/// target, so readers see either the old object or the new one. Concurrent
/// writers to one key never share a temp file; the last rename wins.
fn write_atomically(target: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent directory"))?;
    fs::create_dir_all(parent)?;

    let mut temp = tempfile::Builder::new().prefix(TEMP_PREFIX).tempfile_in(parent)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|err| err.error)?;
    Ok(())
}

fn modified_at(path: &Path) -> io::Result<DateTime<Utc>> {
    Ok(DateTime::<Utc>::from(fs::metadata(path)?.modified()?))
}

fn read_sidecar(path: &Path) -> Sidecar {
    fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_default()
}

fn sidecar_describes(sidecar: &Sidecar, bytes: &[u8]) -> bool {
    sidecar
        .metadata
        .get(DIGEST_METADATA_KEY)
        .map_or(true, |digest| *digest == content_digest(bytes))
}

/// Reads the body and its sidecar, retrying while a concurrent put is between
/// its two renames. Metadata that still does not match the body is dropped.
fn read_consistent(
    key: &str,
    object_path: &Path,
    sidecar_path: &Path,
) -> Result<(Vec<u8>, Sidecar, DateTime<Utc>), StoreError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let bytes = match fs::read(object_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        let last_modified = modified_at(object_path)?;
        let mut sidecar = read_sidecar(sidecar_path);
        if sidecar_describes(&sidecar, &bytes) {
            return Ok((bytes, sidecar, last_modified));
        }
        if attempt >= CONSISTENT_READ_ATTEMPTS {
            warn!("metadata for {} does not match its content, dropping it", key);
            sidecar.metadata = ObjectMetadata::from([(DIGEST_METADATA_KEY.to_string(), content_digest(&bytes))]);
            return Ok((bytes, sidecar, last_modified));
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn collect_keys(root: &Path, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if dir == root && name == META_DIR {
            continue;
        }
        if entry.file_type()?.is_dir() {
            collect_keys(root, &path, out)?;
        } else if !name.starts_with(TEMP_PREFIX) {
            if let Ok(relative) = path.strip_prefix(root) {
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(key);
            }
        }
    }
    Ok(())
}

async fn blocking<T, F>(task: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| StoreError::Internal(err.to_string()))?
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        mut metadata: ObjectMetadata,
    ) -> Result<(), StoreError> {
        validate_key(key)?;
        metadata.insert(DIGEST_METADATA_KEY.into(), content_digest(&bytes));

        let object_path = self.object_path(key);
        let sidecar_path = self.sidecar_path(key);
        let sidecar = serde_json::to_vec(&Sidecar {
            content_type: content_type.to_string(),
            metadata,
        })?;

        // Sidecar first, body last; `get` checks the digest across the gap.
        blocking(move || {
            write_atomically(&sidecar_path, &sidecar)?;
            write_atomically(&object_path, &bytes)?;
            Ok(())
        })
        .await?;

        let _ = self.events.send(ObjectCreated { key: key.to_string() });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<StoredObject, StoreError> {
        validate_key(key)?;
        let object_path = self.object_path(key);
        let sidecar_path = self.sidecar_path(key);
        let owned_key = key.to_string();

        blocking(move || {
            let (bytes, sidecar, last_modified) = read_consistent(&owned_key, &object_path, &sidecar_path)?;
            Ok(StoredObject {
                key: owned_key,
                bytes,
                content_type: sidecar.content_type,
                metadata: sidecar.metadata,
                last_modified,
            })
        })
        .await
    }

    async fn list(&self, prefix: &str, recency: Option<Duration>) -> Result<Vec<ObjectSummary>, StoreError> {
        let cutoff = recency_cutoff(recency);
        let root = self.root.clone();
        let prefix = prefix.to_string();

        blocking(move || {
            let mut keys = Vec::new();
            collect_keys(&root, &root, &mut keys)?;

            let mut summaries = Vec::new();
            for key in keys.into_iter().filter(|key| key.starts_with(&prefix)) {
                let last_modified = match modified_at(&root.join(&key)) {
                    Ok(at) => at,
                    Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                    Err(err) => return Err(err.into()),
                };
                if cutoff.is_some_and(|cutoff| last_modified < cutoff) {
                    continue;
                }
                let sidecar = read_sidecar(&sidecar_path_in(&root, &key));
                summaries.push(ObjectSummary {
                    key,
                    last_modified,
                    metadata: sidecar.metadata,
                });
            }
            sort_newest_first(&mut summaries);
            Ok(summaries)
        })
        .await
    }

    fn subscribe(&self) -> broadcast::Receiver<ObjectCreated> {
        self.events.subscribe()
    }
}
