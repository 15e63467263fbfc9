//! Asynchronous path: reacts to job objects landing in storage and writes the
//! result to the job's deterministic response key.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use crate::backend::TranslationBackend;
use crate::config::{DispatchOptions, TriggerOptions};
use crate::job::JobBuilder;
use crate::keys::KeyLayout;
use crate::persist::{decode_stored_job, salvage_job};
use crate::result::{JobResult, TranslationItemResult};
use crate::storage::{ObjectCreated, ObjectMetadata, ObjectStore, StoreError, JSON_CONTENT_TYPE};
use crate::time::rfc3339;
use crate::translate::TranslationEngine;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Skipped {
        key: String,
        reason: String,
    },
    Written {
        job_key: String,
        response_key: String,
        successful: usize,
        total: usize,
    },
}

pub struct AsyncTriggerProcessor {
    store: Arc<dyn ObjectStore>,
    engine: TranslationEngine,
    layout: KeyLayout,
    builder: JobBuilder,
    budget: Duration,
}

impl AsyncTriggerProcessor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        backend: Arc<dyn TranslationBackend>,
        layout: KeyLayout,
        builder: JobBuilder,
        dispatch: &DispatchOptions,
        trigger: &TriggerOptions,
    ) -> Self {
        Self::with_engine(
            store,
            TranslationEngine::new(backend, dispatch),
            layout,
            builder,
            trigger.execution_budget(),
        )
    }

    pub fn with_engine(
        store: Arc<dyn ObjectStore>,
        engine: TranslationEngine,
        layout: KeyLayout,
        builder: JobBuilder,
        budget: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            layout,
            builder,
            budget,
        }
    }

    /// Handles one creation event. Only storage failures on the response
    /// write are returned; unreadable jobs still produce a result object.
    pub async fn process_key(&self, key: &str) -> Result<TriggerOutcome, StoreError> {
        let (Some(stem), Some(response_key)) = (self.layout.job_stem(key), self.layout.response_key_for_job_key(key))
        else {
            info!("skipping {}: not a job object", key);
            return Ok(TriggerOutcome::Skipped {
                key: key.to_string(),
                reason: "not a job object".into(),
            });
        };
        let deadline = Instant::now() + self.budget;

        let result = match self.store.get(key).await {
            Ok(object) => match decode_stored_job(&self.builder, &object.bytes, stem, object.last_modified) {
                Ok(job) => {
                    let items = self.engine.translate_job(&job, Some(deadline)).await;
                    JobResult::for_job(&job, items)
                }
                Err(err) => {
                    warn!("job object {} is unusable: {}", key, err);
                    failed_result(stem, &object.bytes, &err.to_string(), object.last_modified)
                }
            },
            Err(err) => {
                warn!("failed to read job object {}: {}", key, err);
                failed_result(stem, &[], &err.to_string(), Utc::now())
            }
        };

        self.write_response(&response_key, &result).await?;
        info!(
            "wrote {} for {} ({}/{} translated)",
            response_key,
            key,
            result.metadata().successful_translations,
            result.metadata().total_texts
        );
        Ok(TriggerOutcome::Written {
            job_key: key.to_string(),
            response_key,
            successful: result.metadata().successful_translations,
            total: result.metadata().total_texts,
        })
    }

    async fn write_response(&self, response_key: &str, result: &JobResult) -> Result<(), StoreError> {
        let meta = result.metadata();
        let summary = result.summary();
        let metadata = ObjectMetadata::from([
            ("source-language".to_string(), meta.source_language.clone()),
            ("target-language".to_string(), meta.target_language.clone()),
            ("texts-count".to_string(), meta.total_texts.to_string()),
            ("successful-translations".to_string(), meta.successful_translations.to_string()),
            ("success-rate".to_string(), summary.success_rate.to_string()),
            ("total-characters".to_string(), summary.total_characters_translated.to_string()),
            ("processed-at".to_string(), rfc3339(Utc::now())),
        ]);
        let bytes = serde_json::to_vec_pretty(result)?;
        self.store.put(response_key, bytes, JSON_CONTENT_TYPE, metadata).await
    }
}

fn failed_result(job_id: &str, bytes: &[u8], reason: &str, at: DateTime<Utc>) -> JobResult {
    let salvaged = salvage_job(bytes);
    let items = salvaged
        .texts
        .into_iter()
        .enumerate()
        .map(|(index, text)| TranslationItemResult::failure(index, text, reason))
        .collect();
    JobResult::from_items(job_id, salvaged.source_language, salvaged.target_language, items, at)
}

fn dispatch(
    tasks: &mut JoinSet<()>,
    processor: &Arc<AsyncTriggerProcessor>,
    outcome_tx: &broadcast::Sender<TriggerOutcome>,
    created: ObjectCreated,
) {
    let processor = Arc::clone(processor);
    let outcome_tx = outcome_tx.clone();
    tasks.spawn(async move {
        match processor.process_key(&created.key).await {
            Ok(outcome) => {
                let _ = outcome_tx.send(outcome);
            }
            Err(err) => warn!("failed to process {}: {}", created.key, err),
        }
    });
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        warn!("trigger task failed: {}", err);
    }
}

#[derive(Debug)]
enum ListenerMsg {
    Shutdown,
}

/// Background task feeding store creation events to the processor. Each
/// event is handled on its own task; `shutdown` waits for all of them.
pub struct TriggerListener {
    tx: mpsc::Sender<ListenerMsg>,
    outcomes: broadcast::Sender<TriggerOutcome>,
    handle: JoinHandle<()>,
}

impl TriggerListener {
    pub fn spawn(processor: Arc<AsyncTriggerProcessor>, mut events: broadcast::Receiver<ObjectCreated>) -> Self {
        let (tx, mut rx) = mpsc::channel::<ListenerMsg>(1);
        let (outcomes, _) = broadcast::channel(64);
        let outcome_tx = outcomes.clone();

        let handle = tokio::spawn(async move {
            let mut tasks = JoinSet::new();
            loop {
                tokio::select! {
                    msg = rx.recv() => match msg {
                        Some(ListenerMsg::Shutdown) | None => break,
                    },
                    event = events.recv() => match event {
                        Ok(created) => dispatch(&mut tasks, &processor, &outcome_tx, created),
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("trigger listener lagged, {} creation events dropped", missed);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(joined),
                }
            }

            // Events already announced still get processed.
            loop {
                match events.try_recv() {
                    Ok(created) => dispatch(&mut tasks, &processor, &outcome_tx, created),
                    Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                        warn!("trigger listener lagged, {} creation events dropped", missed);
                    }
                    Err(_) => break,
                }
            }
            if !tasks.is_empty() {
                info!("trigger listener draining {} in-flight jobs", tasks.len());
            }
            while let Some(joined) = tasks.join_next().await {
                log_join(joined);
            }
            info!("trigger listener stopped");
        });

        Self { tx, outcomes, handle }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TriggerOutcome> {
        self.outcomes.subscribe()
    }

    pub async fn shutdown(self) {
        let _ = self.tx.send(ListenerMsg::Shutdown).await;
        if let Err(err) = self.handle.await {
            warn!("trigger listener task failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, BackendRequest, BackendTranslation};
    use crate::identity::CallerIdentity;
    use crate::persist::persist_job;
    use crate::retry::RetryPolicy;
    use crate::storage::InMemoryObjectStore;
    use async_trait::async_trait;
    use serde_json::Value;

    struct UppercaseBackend;

    #[async_trait]
    impl TranslationBackend for UppercaseBackend {
        fn name(&self) -> &str {
            "uppercase"
        }

        async fn translate(&self, request: &BackendRequest) -> Result<BackendTranslation, BackendError> {
            Ok(BackendTranslation {
                translated_text: request.text.to_uppercase(),
                detected_source_language: None,
            })
        }
    }

    fn processor(store: Arc<InMemoryObjectStore>) -> AsyncTriggerProcessor {
        let engine = TranslationEngine::with_policy(Arc::new(UppercaseBackend), 5, RetryPolicy::immediate(0));
        AsyncTriggerProcessor::with_engine(
            store,
            engine,
            KeyLayout::default(),
            JobBuilder::default(),
            Duration::from_secs(60),
        )
    }

    async fn read_json(store: &InMemoryObjectStore, key: &str) -> Value {
        serde_json::from_slice(&store.get(key).await.unwrap().bytes).unwrap()
    }

    #[tokio::test]
    async fn redelivery_overwrites_one_response_with_identical_content() {
        let store = Arc::new(InMemoryObjectStore::new());
        let job = JobBuilder::default().from_text("en", "es", "hello\nworld").unwrap();
        let job_key = persist_job(store.as_ref(), &KeyLayout::default(), &job, &CallerIdentity::anonymous())
            .await
            .unwrap();
        let processor = processor(store.clone());

        processor.process_key(&job_key).await.unwrap();
        let first = store.get(&KeyLayout::default().response_key(job.job_id())).await.unwrap();
        processor.process_key(&job_key).await.unwrap();
        let second = store.get(&KeyLayout::default().response_key(job.job_id())).await.unwrap();

        assert_eq!(store.list("responses/", None).await.unwrap().len(), 1);
        assert_eq!(first.bytes, second.bytes);
        assert_eq!(second.metadata["success-rate"], "100");
        assert_eq!(second.metadata["texts-count"], "2");
        assert_eq!(second.metadata["total-characters"], "10");
    }

    #[tokio::test]
    async fn foreign_keys_are_skipped() {
        let store = Arc::new(InMemoryObjectStore::new());
        let processor = processor(store.clone());
        for key in ["responses/a.json", "jobs/readme.txt", "other/a.json"] {
            let outcome = processor.process_key(key).await.unwrap();
            assert!(matches!(outcome, TriggerOutcome::Skipped { .. }));
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn unusable_job_still_yields_a_result() {
        let store = Arc::new(InMemoryObjectStore::new());
        store
            .put(
                "jobs/broken.json",
                br#"{"source_language":"en","target_language":"zz","texts":["one","two"]}"#.to_vec(),
                JSON_CONTENT_TYPE,
                ObjectMetadata::new(),
            )
            .await
            .unwrap();

        processor(store.clone()).process_key("jobs/broken.json").await.unwrap();
        let written = read_json(&store, "responses/broken.json").await;
        assert_eq!(written["job_id"], "broken");
        assert_eq!(written["request_metadata"]["failed_translations"], 2);
        assert_eq!(written["translations"][1]["original_text"], "two");
        assert!(written["translations"][0]["error"]
            .as_str()
            .unwrap()
            .contains("Unsupported target language: zz"));
    }

    #[tokio::test]
    async fn missing_job_object_writes_empty_failure() {
        let store = Arc::new(InMemoryObjectStore::new());
        processor(store.clone()).process_key("jobs/gone.json").await.unwrap();
        let written = read_json(&store, "responses/gone.json").await;
        assert_eq!(written["request_metadata"]["total_texts"], 0);
        assert_eq!(written["translations"], Value::Array(Vec::new()));
    }

    #[tokio::test]
    async fn listener_processes_persisted_jobs() {
        let store = Arc::new(InMemoryObjectStore::new());
        let processor = Arc::new(processor(store.clone()));
        let listener = TriggerListener::spawn(processor, store.subscribe());
        let mut outcomes = listener.subscribe();

        let job = JobBuilder::default().from_text("en", "fr", "bonjour").unwrap();
        persist_job(store.as_ref(), &KeyLayout::default(), &job, &CallerIdentity::anonymous())
            .await
            .unwrap();

        loop {
            match outcomes.recv().await.unwrap() {
                TriggerOutcome::Written { response_key, total, .. } => {
                    assert_eq!(response_key, KeyLayout::default().response_key(job.job_id()));
                    assert_eq!(total, 1);
                    break;
                }
                TriggerOutcome::Skipped { .. } => continue,
            }
        }
        listener.shutdown().await;
    }

    struct SlowBackend;

    #[async_trait]
    impl TranslationBackend for SlowBackend {
        fn name(&self) -> &str {
            "slow"
        }

        async fn translate(&self, request: &BackendRequest) -> Result<BackendTranslation, BackendError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(BackendTranslation {
                translated_text: request.text.to_uppercase(),
                detected_source_language: None,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_in_flight_jobs() {
        let store = Arc::new(InMemoryObjectStore::new());
        let engine = TranslationEngine::with_policy(Arc::new(SlowBackend), 1, RetryPolicy::immediate(0));
        let processor = Arc::new(AsyncTriggerProcessor::with_engine(
            store.clone(),
            engine,
            KeyLayout::default(),
            JobBuilder::default(),
            Duration::from_secs(60),
        ));
        let listener = TriggerListener::spawn(processor, store.subscribe());

        let job = JobBuilder::default().from_text("en", "de", "one\ntwo").unwrap();
        persist_job(store.as_ref(), &KeyLayout::default(), &job, &CallerIdentity::anonymous())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        listener.shutdown().await;

        let written = read_json(&store, &KeyLayout::default().response_key(job.job_id())).await;
        assert_eq!(written["request_metadata"]["successful_translations"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_processes_events_announced_before_it() {
        let store = Arc::new(InMemoryObjectStore::new());
        let listener = TriggerListener::spawn(Arc::new(processor(store.clone())), store.subscribe());

        let job = JobBuilder::default().from_text("en", "it", "ciao").unwrap();
        persist_job(store.as_ref(), &KeyLayout::default(), &job, &CallerIdentity::anonymous())
            .await
            .unwrap();
        listener.shutdown().await;

        assert!(store.get(&KeyLayout::default().response_key(job.job_id())).await.is_ok());
    }
}
