//! Response reconciliation: one authoritative result per job out of whatever
//! the two delivery paths produced.

pub mod poll;
pub mod shapes;

pub use poll::{poll_until, PollSchedule};
pub use shapes::{interpret, ExtractedEntry, ShapeMatch, MATCHERS};

use log::{debug, error, info, warn};
use serde_json::Value;
use std::sync::Arc;

use crate::job::TranslationJob;
use crate::keys::KeyLayout;
use crate::result::{JobResult, ReconciledResult, ResultSource, TranslationItemResult, NO_RESULT_REASON};
use crate::storage::{ObjectStore, StoreError};
use crate::sync_path::SyncCallError;

pub const MISSING_ITEM_REASON: &str = "no result for this item";
pub const MISSING_TEXT_REASON: &str = "missing translated text";

pub struct Reconciler {
    store: Option<Arc<dyn ObjectStore>>,
    layout: KeyLayout,
    schedule: PollSchedule,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ObjectStore>, layout: KeyLayout, schedule: PollSchedule) -> Self {
        Self {
            store: Some(store),
            layout,
            schedule,
        }
    }

    /// A reconciler with no durable store: sync result or synthesized.
    pub fn sync_only() -> Self {
        Self {
            store: None,
            layout: KeyLayout::default(),
            schedule: PollSchedule::default(),
        }
    }

    /// Never fails. `async_expected` is false when the job was never
    /// persisted, in which case no async output can appear and polling is
    /// skipped.
    pub async fn reconcile(
        &self,
        job: &TranslationJob,
        sync_outcome: Result<Value, SyncCallError>,
        async_expected: bool,
    ) -> ReconciledResult {
        match sync_outcome {
            Ok(value) => match usable_match(&value) {
                Some(found) => {
                    debug!("job {}: sync response matched {}", job.job_id(), found.matcher);
                    return build(job, ResultSource::Sync { matcher: found.matcher }, found.entries);
                }
                None => warn!("job {}: sync response has no usable translations", job.job_id()),
            },
            Err(err) => warn!("job {}: sync path failed: {}", job.job_id(), err),
        }

        if async_expected {
            if let Some(reconciled) = self.poll_async(job).await {
                return reconciled;
            }
        }

        error!(
            "job {}: no result from either path, synthesizing {} failed items",
            job.job_id(),
            job.len()
        );
        ReconciledResult::new(ResultSource::Synthesized, JobResult::all_failed(job, NO_RESULT_REASON))
    }

    async fn poll_async(&self, job: &TranslationJob) -> Option<ReconciledResult> {
        let store = self.store.as_ref()?;
        let key = self.layout.response_key(job.job_id());
        info!("job {}: polling {} for the async result", job.job_id(), key);

        let found = poll_until(self.schedule, |attempt| {
            let key = key.clone();
            async move {
                match read_usable(store.as_ref(), &key).await {
                    Ok(found) => found,
                    Err(StoreError::NotFound(_)) => {
                        debug!("poll attempt {}: {} not there yet", attempt, key);
                        None
                    }
                    Err(err) => {
                        warn!("poll attempt {}: failed to read {}: {}", attempt, key, err);
                        None
                    }
                }
            }
        })
        .await?;

        Some(build(
            job,
            ResultSource::Async {
                key,
                matcher: found.matcher,
            },
            found.entries,
        ))
    }
}

async fn read_usable(store: &dyn ObjectStore, key: &str) -> Result<Option<ShapeMatch>, StoreError> {
    let object = store.get(key).await?;
    let value: Value = serde_json::from_slice(&object.bytes)?;
    Ok(usable_match(&value))
}

/// A match counts only if it carries at least one entry.
fn usable_match(value: &Value) -> Option<ShapeMatch> {
    interpret(value).filter(|found| !found.entries.is_empty())
}

fn build(job: &TranslationJob, source: ResultSource, entries: Vec<ExtractedEntry>) -> ReconciledResult {
    ReconciledResult::new(source, JobResult::for_job(job, align(job, entries)))
}

/// Places extracted entries onto the job's items: by `index` when present and
/// in range (first wins), otherwise by position. Uncovered items become
/// error entries.
pub fn align(job: &TranslationJob, entries: Vec<ExtractedEntry>) -> Vec<TranslationItemResult> {
    let len = job.len();
    let mut slots: Vec<Option<ExtractedEntry>> = vec![None; len];
    let mut positional = Vec::new();

    for (position, entry) in entries.into_iter().enumerate() {
        match entry.index {
            Some(index) if index < len => {
                if slots[index].is_none() {
                    slots[index] = Some(entry);
                }
            }
            _ => positional.push((position, entry)),
        }
    }
    for (position, entry) in positional {
        if position < len && slots[position].is_none() {
            slots[position] = Some(entry);
        }
    }

    slots
        .into_iter()
        .zip(job.items())
        .enumerate()
        .map(|(index, (slot, original))| match slot {
            Some(entry) => to_item(index, original, entry),
            None => TranslationItemResult::failure(index, original.clone(), MISSING_ITEM_REASON),
        })
        .collect()
}

fn to_item(index: usize, original: &str, entry: ExtractedEntry) -> TranslationItemResult {
    if let Some(status) = entry.status.as_deref() {
        if !status.eq_ignore_ascii_case("success") {
            let reason = entry
                .error
                .unwrap_or_else(|| format!("upstream reported status '{status}'"));
            return TranslationItemResult::failure(index, original, reason);
        }
    }
    match entry.translated_text {
        Some(text) => TranslationItemResult::success(index, original, text, entry.detected_source_language),
        None => TranslationItemResult::failure(index, original, MISSING_TEXT_REASON),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobBuilder;
    use crate::storage::{InMemoryObjectStore, ObjectMetadata, JSON_CONTENT_TYPE};
    use serde_json::json;
    use std::time::Duration;

    fn job() -> TranslationJob {
        JobBuilder::default()
            .from_text("en", "es", "Hello, world!\nGood morning\nGood night")
            .unwrap()
    }

    fn entry(index: Option<usize>, text: &str) -> ExtractedEntry {
        ExtractedEntry {
            index,
            translated_text: Some(text.into()),
            status: Some("success".into()),
            ..ExtractedEntry::default()
        }
    }

    fn schedule() -> PollSchedule {
        PollSchedule::new(Duration::from_secs(5), Duration::from_secs(120))
    }

    #[test]
    fn alignment_prefers_index_then_position() {
        let job = job();
        let items = align(
            &job,
            vec![entry(Some(2), "c"), entry(None, "a"), entry(Some(2), "dup"), entry(Some(9), "out")],
        );

        assert_eq!(items.len(), 3);
        assert_eq!(items[2].translated_text.as_deref(), Some("c"));
        assert_eq!(items[1].translated_text.as_deref(), Some("a"));
        assert!(!items[0].is_success());
        assert_eq!(items[0].error.as_deref(), Some(MISSING_ITEM_REASON));
        assert!(items.iter().zip(job.items()).all(|(item, text)| &item.original_text == text));
    }

    #[test]
    fn status_and_text_rules() {
        let job = job();
        let items = align(
            &job,
            vec![
                ExtractedEntry {
                    index: Some(0),
                    status: Some("error".into()),
                    error: Some("throttled".into()),
                    translated_text: Some("ignored".into()),
                    ..ExtractedEntry::default()
                },
                ExtractedEntry {
                    index: Some(1),
                    status: Some("success".into()),
                    ..ExtractedEntry::default()
                },
                ExtractedEntry {
                    index: Some(2),
                    status: Some("pending".into()),
                    ..ExtractedEntry::default()
                },
            ],
        );
        assert_eq!(items[0].error.as_deref(), Some("throttled"));
        assert_eq!(items[0].translated_text, None);
        assert_eq!(items[1].error.as_deref(), Some(MISSING_TEXT_REASON));
        assert_eq!(items[2].error.as_deref(), Some("upstream reported status 'pending'"));
    }

    #[tokio::test]
    async fn usable_sync_result_wins_and_stats_are_recomputed() {
        let store = Arc::new(InMemoryObjectStore::new());
        let reconciler = Reconciler::new(store.clone(), KeyLayout::default(), schedule());
        let job = job();
        let body = json!({
            "request_metadata": {"successful_translations": 99, "total_texts": 99},
            "translations": [
                {"index": 0, "translated_text": "¡Hola, mundo!", "status": "success"},
                {"index": 1, "translated_text": "Buenos días", "status": "success"}
            ],
            "summary": {"success_rate": 100}
        });
        let envelope = json!({"statusCode": 200, "body": body.to_string()});

        let reconciled = reconciler.reconcile(&job, Ok(envelope), true).await;
        assert_eq!(reconciled.source(), &ResultSource::Sync { matcher: "wrapper" });
        assert_eq!(reconciled.metadata().total_texts, 3);
        assert_eq!(reconciled.metadata().successful_translations, 2);
        assert_eq!(reconciled.summary().success_rate, 67);
        assert_eq!(reconciled.summary().total_characters_translated, 13 + 11);
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_the_durable_object() {
        let store = Arc::new(InMemoryObjectStore::new());
        let reconciler = Reconciler::new(store.clone(), KeyLayout::default(), schedule());
        let job = job();
        let key = KeyLayout::default().response_key(job.job_id());

        let writer = {
            let store = store.clone();
            let key = key.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(12)).await;
                let body = json!({"translations": ["a", "b", "c"]});
                store
                    .put(&key, body.to_string().into_bytes(), JSON_CONTENT_TYPE, ObjectMetadata::new())
                    .await
                    .unwrap();
            })
        };

        let reconciled = reconciler
            .reconcile(&job, Err(SyncCallError::Transport("connection refused".into())), true)
            .await;
        writer.await.unwrap();

        assert_eq!(
            reconciled.source(),
            &ResultSource::Async {
                key,
                matcher: "direct"
            }
        );
        assert_eq!(reconciled.summary().success_rate, 100);
        assert_eq!(reconciled.items()[2].translated_text.as_deref(), Some("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn total_miss_is_synthesized() {
        let store = Arc::new(InMemoryObjectStore::new());
        let reconciler = Reconciler::new(store, KeyLayout::default(), schedule());
        let job = job();

        let started = tokio::time::Instant::now();
        let reconciled = reconciler.reconcile(&job, Ok(json!({"unexpected": true})), true).await;

        assert_eq!(started.elapsed(), Duration::from_secs(120));
        assert_eq!(reconciled.source(), &ResultSource::Synthesized);
        assert_eq!(reconciled.items().len(), 3);
        assert_eq!(reconciled.metadata().failed_translations, 3);
        assert!(reconciled
            .items()
            .iter()
            .all(|item| item.error.as_deref() == Some(NO_RESULT_REASON)));
    }

    #[tokio::test]
    async fn polling_is_skipped_when_no_async_output_can_appear() {
        let reconciler = Reconciler::sync_only();
        let job = job();
        let reconciled = reconciler.reconcile(&job, Ok(json!({"translations": []})), false).await;
        assert_eq!(reconciled.source(), &ResultSource::Synthesized);
        assert_eq!(reconciled.summary().success_rate, 0);
    }
}
