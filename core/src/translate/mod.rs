//! Per-item translation shared by the synchronous service and the trigger
//! processor: bounded fan-out, per-item retry, failures recorded on the item.

use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout_at, Instant};

use crate::backend::{BackendRequest, TranslationBackend};
use crate::config::DispatchOptions;
use crate::job::TranslationJob;
use crate::result::TranslationItemResult;
use crate::retry::{evaluate_retry, RetryPolicy};

pub const EMPTY_TEXT_REASON: &str = "empty text";
pub const BUDGET_EXHAUSTED_REASON: &str = "execution budget exhausted before the item was translated";
const TASK_FAILED_REASON: &str = "translation task failed";

#[derive(Clone)]
pub struct TranslationEngine {
    backend: Arc<dyn TranslationBackend>,
    concurrency: usize,
    policy: RetryPolicy,
}

impl TranslationEngine {
    pub fn new(backend: Arc<dyn TranslationBackend>, options: &DispatchOptions) -> Self {
        Self::with_policy(backend, options.concurrency, options.retry_policy())
    }

    pub fn with_policy(backend: Arc<dyn TranslationBackend>, concurrency: usize, policy: RetryPolicy) -> Self {
        Self {
            backend,
            concurrency: concurrency.max(1),
            policy,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Translates every item of `job`, returning one result per item in job
    /// order. Items still outstanding at `deadline` are recorded as failures.
    pub async fn translate_job(&self, job: &TranslationJob, deadline: Option<Instant>) -> Vec<TranslationItemResult> {
        let mut slots: Vec<Option<TranslationItemResult>> = vec![None; job.len()];
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (index, text) in job.items().iter().enumerate() {
            if text.trim().is_empty() {
                slots[index] = Some(TranslationItemResult::failure(index, text.clone(), EMPTY_TEXT_REASON));
                continue;
            }

            let semaphore = Arc::clone(&semaphore);
            let backend = Arc::clone(&self.backend);
            let policy = self.policy;
            let request = BackendRequest::new(text.clone(), job.source_language(), job.target_language());
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (index, translate_item(backend.as_ref(), index, request, policy).await)
            });
        }

        let mut budget_exhausted = false;
        loop {
            let next = match deadline {
                Some(deadline) => match timeout_at(deadline, tasks.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        budget_exhausted = true;
                        tasks.abort_all();
                        break;
                    }
                },
                None => tasks.join_next().await,
            };

            match next {
                Some(Ok((index, item))) => slots[index] = Some(item),
                Some(Err(err)) => warn!("translation task for job {} failed: {}", job.job_id(), err),
                None => break,
            }
        }

        let leftover_reason = if budget_exhausted {
            warn!("job {}: execution budget exhausted", job.job_id());
            BUDGET_EXHAUSTED_REASON
        } else {
            TASK_FAILED_REASON
        };

        slots
            .into_iter()
            .zip(job.items())
            .enumerate()
            .map(|(index, (slot, text))| {
                slot.unwrap_or_else(|| TranslationItemResult::failure(index, text.clone(), leftover_reason))
            })
            .collect()
    }
}

/// One item against the backend, retrying throttled and transient failures.
pub async fn translate_item(
    backend: &dyn TranslationBackend,
    index: usize,
    request: BackendRequest,
    policy: RetryPolicy,
) -> TranslationItemResult {
    let mut retries: u32 = 0;
    loop {
        match backend.translate(&request).await {
            Ok(translation) => {
                debug!("item {} translated after {} retries", index, retries);
                return TranslationItemResult::success(
                    index,
                    request.text,
                    translation.translated_text,
                    translation.detected_source_language,
                );
            }
            Err(error) => {
                let decision = evaluate_retry(&error, policy, retries);
                if decision.should_retry {
                    warn!(
                        "item {}: {} [{}]; retry {}/{} in {}ms{}",
                        index,
                        error,
                        error.code(),
                        retries + 1,
                        policy.max_retries,
                        decision.delay_ms,
                        if decision.used_hint { " (server hint)" } else { "" }
                    );
                    sleep(decision.delay()).await;
                    retries += 1;
                    continue;
                }

                let attempts = retries + 1;
                warn!("item {} failed after {} attempt(s): {}", index, attempts, error);
                let reason = if attempts > 1 {
                    format!("{error} (after {attempts} attempts)")
                } else {
                    error.to_string()
                };
                return TranslationItemResult::failure(index, request.text, reason);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, BackendTranslation};
    use crate::job::JobBuilder;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Uppercases text; texts listed in `failures` fail that many times first.
    #[derive(Default)]
    struct ScriptedBackend {
        failures: Mutex<HashMap<String, usize>>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedBackend {
        fn failing(text: &str, times: usize) -> Self {
            let backend = Self::default();
            backend.failures.lock().unwrap().insert(text.to_string(), times);
            backend
        }
    }

    #[async_trait]
    impl TranslationBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn translate(&self, request: &BackendRequest) -> Result<BackendTranslation, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&request.text) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(BackendError::Throttled {
                        message: "Rate exceeded".into(),
                        retry_after: None,
                    });
                }
            }
            Ok(BackendTranslation {
                translated_text: request.text.to_uppercase(),
                detected_source_language: Some(request.source_language.clone()),
            })
        }
    }

    fn job(texts: &[&str]) -> TranslationJob {
        JobBuilder::default().from_text("en", "es", &texts.join("\n")).unwrap()
    }

    #[tokio::test]
    async fn preserves_order_and_count() {
        let engine = TranslationEngine::with_policy(Arc::new(ScriptedBackend::default()), 3, RetryPolicy::immediate(2));
        let items = engine.translate_job(&job(&["a", "b", "c", "d"]), None).await;
        let texts: Vec<_> = items.iter().map(|i| i.translated_text.clone().unwrap()).collect();
        assert_eq!(texts, vec!["A", "B", "C", "D"]);
        assert!(items.iter().enumerate().all(|(i, item)| item.index == i));
    }

    #[tokio::test]
    async fn retries_throttling_then_succeeds() {
        let backend = Arc::new(ScriptedBackend::failing("Good morning", 2));
        let engine = TranslationEngine::with_policy(backend.clone(), 5, RetryPolicy::immediate(2));
        let items = engine.translate_job(&job(&["Hello, world!", "Good morning"]), None).await;
        assert!(items.iter().all(TranslationItemResult::is_success));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn exhausted_retries_isolate_the_item() {
        let backend = Arc::new(ScriptedBackend::failing("Good morning", 10));
        let engine = TranslationEngine::with_policy(backend.clone(), 5, RetryPolicy::immediate(2));
        let items = engine.translate_job(&job(&["Hello, world!", "Good morning"]), None).await;

        assert!(items[0].is_success());
        assert!(!items[1].is_success());
        assert_eq!(items[1].original_text, "Good morning");
        assert!(items[1].error.as_deref().unwrap().contains("after 3 attempts"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn fan_out_is_bounded() {
        let backend = Arc::new(ScriptedBackend {
            delay: Duration::from_millis(100),
            ..Default::default()
        });
        let engine = TranslationEngine::with_policy(backend.clone(), 2, RetryPolicy::immediate(0));
        let items = engine.translate_job(&job(&["a", "b", "c", "d", "e"]), None).await;
        assert_eq!(items.len(), 5);
        assert_eq!(backend.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_marks_outstanding_items() {
        let backend = Arc::new(ScriptedBackend {
            delay: Duration::from_secs(10),
            ..Default::default()
        });
        let engine = TranslationEngine::with_policy(backend, 1, RetryPolicy::immediate(0));
        let deadline = Instant::now() + Duration::from_secs(15);
        let items = engine.translate_job(&job(&["a", "b", "c"]), Some(deadline)).await;

        assert_eq!(items.len(), 3);
        assert!(items[0].is_success());
        assert_eq!(items[1].error.as_deref(), Some(BUDGET_EXHAUSTED_REASON));
        assert_eq!(items[2].error.as_deref(), Some(BUDGET_EXHAUSTED_REASON));
    }

    #[tokio::test]
    async fn blank_items_never_reach_the_backend() {
        let backend = Arc::new(ScriptedBackend::default());
        let engine = TranslationEngine::with_policy(backend.clone(), 2, RetryPolicy::immediate(0));
        let job = JobBuilder::default()
            .from_file(br#"{"source_language":"en","target_language":"es","texts":["Hi","   "]}"#)
            .unwrap();
        let items = engine.translate_job(&job, None).await;
        assert_eq!(items[1].error.as_deref(), Some(EMPTY_TEXT_REASON));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }
}
