//! Submission pipeline: build the job, persist it, call the sync path and
//! reconcile. Progress is published as a single state value.

use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

use crate::config::TranslatorConfig;
use crate::identity::CallerIdentity;
use crate::job::{JobBuilder, JobError, TranslationJob};
use crate::keys::KeyLayout;
use crate::persist::persist_job_best_effort;
use crate::reconcile::{PollSchedule, Reconciler};
use crate::result::ReconciledResult;
use crate::storage::ObjectStore;
use crate::sync_path::{SyncCallError, SyncPath};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SubmissionState {
    #[default]
    Idle,
    Submitting,
    AwaitingResult,
    Reconciled(Box<ReconciledResult>),
    Failed(String),
}

impl SubmissionState {
    pub fn label(&self) -> &'static str {
        match self {
            SubmissionState::Idle => "idle",
            SubmissionState::Submitting => "submitting",
            SubmissionState::AwaitingResult => "awaiting_result",
            SubmissionState::Reconciled(_) => "reconciled",
            SubmissionState::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub enum SubmissionInput {
    Text {
        source_language: String,
        target_language: String,
        text: String,
    },
    File {
        bytes: Vec<u8>,
    },
}

pub struct Pipeline {
    builder: JobBuilder,
    sync_path: Arc<dyn SyncPath>,
    store: Option<Arc<dyn ObjectStore>>,
    layout: KeyLayout,
    reconciler: Reconciler,
    sync_timeout: Duration,
    state: watch::Sender<SubmissionState>,
}

impl Pipeline {
    pub fn new(config: &TranslatorConfig, sync_path: Arc<dyn SyncPath>, store: Arc<dyn ObjectStore>) -> Self {
        let layout = KeyLayout::from_options(&config.storage);
        let reconciler = Reconciler::new(
            Arc::clone(&store),
            layout.clone(),
            PollSchedule::from_options(&config.reconcile),
        );
        Self::assemble(config, sync_path, Some(store), layout, reconciler)
    }

    /// No durable store: jobs are not persisted and nothing is polled.
    pub fn without_store(config: &TranslatorConfig, sync_path: Arc<dyn SyncPath>) -> Self {
        Self::assemble(
            config,
            sync_path,
            None,
            KeyLayout::from_options(&config.storage),
            Reconciler::sync_only(),
        )
    }

    fn assemble(
        config: &TranslatorConfig,
        sync_path: Arc<dyn SyncPath>,
        store: Option<Arc<dyn ObjectStore>>,
        layout: KeyLayout,
        reconciler: Reconciler,
    ) -> Self {
        let (state, _) = watch::channel(SubmissionState::Idle);
        Self {
            builder: JobBuilder::new(config.limits.clone()),
            sync_path,
            store,
            layout,
            reconciler,
            sync_timeout: config.pipeline.sync_timeout(),
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SubmissionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SubmissionState {
        self.state.borrow().clone()
    }

    fn publish(&self, next: SubmissionState) {
        debug!("submission state -> {}", next.label());
        self.state.send_replace(next);
    }

    pub fn build_job(&self, input: SubmissionInput) -> Result<TranslationJob, JobError> {
        match input {
            SubmissionInput::Text {
                source_language,
                target_language,
                text,
            } => self.builder.from_text(&source_language, &target_language, &text),
            SubmissionInput::File { bytes } => self.builder.from_file(&bytes),
        }
    }

    /// Only validation and format errors are returned; everything after the
    /// job is built ends in a reconciled result.
    pub async fn submit(
        &self,
        input: SubmissionInput,
        identity: &CallerIdentity,
    ) -> Result<ReconciledResult, JobError> {
        self.publish(SubmissionState::Submitting);
        let job = match self.build_job(input) {
            Ok(job) => job,
            Err(err) => {
                self.publish(SubmissionState::Failed(err.to_string()));
                return Err(err);
            }
        };
        Ok(self.dispatch(&job, identity).await)
    }

    /// Runs an already built job through both delivery paths.
    pub async fn run_job(&self, job: &TranslationJob, identity: &CallerIdentity) -> ReconciledResult {
        self.publish(SubmissionState::Submitting);
        self.dispatch(job, identity).await
    }

    async fn dispatch(&self, job: &TranslationJob, identity: &CallerIdentity) -> ReconciledResult {
        let persisted = match &self.store {
            Some(store) => persist_job_best_effort(store.as_ref(), &self.layout, job, identity)
                .await
                .is_some(),
            None => false,
        };

        info!(
            "job {}: {} items via {} sync path",
            job.job_id(),
            job.len(),
            self.sync_path.name()
        );
        let sync_outcome = match timeout(self.sync_timeout, self.sync_path.call(job)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SyncCallError::TimedOut(self.sync_timeout)),
        };

        self.publish(SubmissionState::AwaitingResult);
        let reconciled = self.reconciler.reconcile(job, sync_outcome, persisted).await;
        self.publish(SubmissionState::Reconciled(Box::new(reconciled.clone())));
        reconciled
    }
}
