//! Durable job envelope.
//!
//! Persisting a job is a side effect composed next to the synchronous call:
//! it can fail on its own, is logged, and never fails the submission.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::CallerIdentity;
use crate::job::{parse_request_value, JobBuilder, JobError, JobOrigin, JobRequest, TranslationJob};
use crate::keys::KeyLayout;
use crate::storage::{ObjectMetadata, ObjectStore, StoreError, JSON_CONTENT_TYPE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredJobMetadata {
    pub job_id: String,
    pub user_id: String,
    pub request_type: JobOrigin,
    pub timestamp: DateTime<Utc>,
    pub source_language: String,
    pub target_language: String,
    pub text_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredJob {
    pub request_data: JobRequest,
    pub metadata: StoredJobMetadata,
}

impl StoredJob {
    pub fn new(job: &TranslationJob, identity: &CallerIdentity) -> Self {
        Self {
            request_data: job.to_request(),
            metadata: StoredJobMetadata {
                job_id: job.job_id().to_string(),
                user_id: identity.as_str().to_string(),
                request_type: job.origin(),
                timestamp: job.submitted_at(),
                source_language: job.source_language().to_string(),
                target_language: job.target_language().to_string(),
                text_count: job.len(),
            },
        }
    }

    fn object_metadata(&self) -> ObjectMetadata {
        let meta = &self.metadata;
        ObjectMetadata::from([
            ("user-id".to_string(), meta.user_id.clone()),
            ("request-type".to_string(), meta.request_type.as_str().to_string()),
            ("source-language".to_string(), meta.source_language.clone()),
            ("target-language".to_string(), meta.target_language.clone()),
            ("text-count".to_string(), meta.text_count.to_string()),
            ("timestamp".to_string(), meta.timestamp.to_rfc3339()),
        ])
    }
}

/// Writes the job under its deterministic key and returns that key.
pub async fn persist_job(
    store: &dyn ObjectStore,
    layout: &KeyLayout,
    job: &TranslationJob,
    identity: &CallerIdentity,
) -> Result<String, StoreError> {
    let envelope = StoredJob::new(job, identity);
    let key = layout.job_key(job.job_id());
    let bytes = serde_json::to_vec_pretty(&envelope)?;
    store
        .put(&key, bytes, JSON_CONTENT_TYPE, envelope.object_metadata())
        .await?;
    info!("job {} persisted to {}", job.job_id(), key);
    Ok(key)
}

/// Same as [`persist_job`] but only logs failures.
pub async fn persist_job_best_effort(
    store: &dyn ObjectStore,
    layout: &KeyLayout,
    job: &TranslationJob,
    identity: &CallerIdentity,
) -> Option<String> {
    match persist_job(store, layout, job, identity).await {
        Ok(key) => Some(key),
        Err(err) => {
            warn!("failed to persist job {}: {}", job.job_id(), err);
            None
        }
    }
}

/// Decodes a job object read back from storage. Accepts the envelope written
/// by [`persist_job`] as well as a bare job wire object uploaded directly, in
/// which case the job id is the key stem and `uploaded_at` the submission time.
pub fn decode_stored_job(
    builder: &JobBuilder,
    bytes: &[u8],
    fallback_job_id: &str,
    uploaded_at: DateTime<Utc>,
) -> Result<TranslationJob, JobError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|err| JobError::Format(format!("job object is not valid JSON: {err}")))?;

    if value.get("request_data").is_some() {
        let envelope: StoredJob = serde_json::from_value(value)
            .map_err(|err| JobError::Format(format!("malformed job envelope: {err}")))?;
        return builder.from_request(
            envelope.request_data,
            envelope.metadata.request_type,
            Some(envelope.metadata.job_id),
            Some(envelope.metadata.timestamp),
        );
    }

    if bytes.len() > builder.limits().max_payload_bytes {
        return Err(JobError::Validation(format!(
            "payload of {} bytes exceeds the {} byte limit",
            bytes.len(),
            builder.limits().max_payload_bytes
        )));
    }
    let request = parse_request_value(&value)?;
    builder.from_request(
        request,
        JobOrigin::UploadedFile,
        Some(fallback_job_id.to_string()),
        Some(uploaded_at),
    )
}

/// What could be read out of a job object that failed to decode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SalvagedJob {
    pub source_language: String,
    pub target_language: String,
    pub texts: Vec<String>,
}

/// Best-effort recovery of an unreadable job object, so a failure result can
/// still name the items it failed.
pub fn salvage_job(bytes: &[u8]) -> SalvagedJob {
    let Ok(value) = serde_json::from_slice::<Value>(bytes) else {
        return SalvagedJob::default();
    };
    let request = value.get("request_data").unwrap_or(&value);
    let language = |field: &str| {
        request
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    SalvagedJob {
        source_language: language("source_language"),
        target_language: language("target_language"),
        texts: salvage_texts(request),
    }
}

fn salvage_texts(request: &Value) -> Vec<String> {
    request
        .get("texts")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| item.as_str().map(str::to_string).unwrap_or_else(|| item.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryObjectStore;

    fn job() -> TranslationJob {
        JobBuilder::default()
            .from_text("en", "es", "Hello, world!\nGood morning")
            .unwrap()
    }

    #[tokio::test]
    async fn persists_envelope_with_metadata() {
        let store = InMemoryObjectStore::new();
        let layout = KeyLayout::default();
        let job = job();

        let key = persist_job(&store, &layout, &job, &CallerIdentity::new("user-1"))
            .await
            .unwrap();
        assert_eq!(key, layout.job_key(job.job_id()));

        let object = store.get(&key).await.unwrap();
        assert_eq!(object.content_type, JSON_CONTENT_TYPE);
        assert_eq!(object.metadata["user-id"], "user-1");
        assert_eq!(object.metadata["text-count"], "2");
        assert_eq!(object.metadata["request-type"], "interactive_text");

        let decoded = decode_stored_job(&JobBuilder::default(), &object.bytes, "ignored", Utc::now()).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn decodes_bare_upload_with_key_stem_as_id() {
        let uploaded_at = Utc::now();
        let job = decode_stored_job(
            &JobBuilder::default(),
            br#"{"source_language":"en","target_language":"fr","texts":["Hi"]}"#,
            "upload-7",
            uploaded_at,
        )
        .unwrap();
        assert_eq!(job.job_id(), "upload-7");
        assert_eq!(job.origin(), JobOrigin::UploadedFile);
        assert_eq!(job.submitted_at(), uploaded_at);
    }

    #[test]
    fn salvages_what_it_can_from_invalid_jobs() {
        let salvaged = salvage_job(br#"{"request_data":{"source_language":"xx","texts":["a","b"]}}"#);
        assert_eq!(salvaged.texts, vec!["a", "b"]);
        assert_eq!(salvaged.source_language, "xx");
        assert_eq!(salvaged.target_language, "");
        assert_eq!(salvage_job(b"garbage"), SalvagedJob::default());
    }
}
