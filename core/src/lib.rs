pub mod backend;
pub mod config;
pub mod history;
pub mod identity;
pub mod job;
pub mod keys;
pub mod languages;
pub mod persist;
pub mod pipeline;
pub mod reconcile;
pub mod result;
pub mod retry;
pub mod storage;
pub mod sync_path;
pub mod sync_service;
pub mod time;
pub mod translate;
pub mod trigger;

pub use backend::{BackendError, BackendRequest, BackendTranslation, HttpBackend, TranslationBackend};
pub use config::{ConfigError, TranslatorConfig};
pub use history::{list_recent_jobs, list_recent_results, RecentEntry};
pub use identity::CallerIdentity;
pub use job::{JobBuilder, JobError, JobOrigin, JobRequest, TranslationJob};
pub use keys::KeyLayout;
pub use persist::{persist_job, persist_job_best_effort, StoredJob};
pub use pipeline::{Pipeline, SubmissionInput, SubmissionState};
pub use reconcile::{PollSchedule, Reconciler};
pub use result::{
    ItemStatus, JobResult, ReconciledResult, ResultSource, TranslationItemResult, NO_RESULT_REASON,
};
pub use retry::RetryPolicy;
pub use storage::{FsObjectStore, InMemoryObjectStore, ObjectStore, StoreError};
pub use sync_path::{HttpSyncPath, SyncCallError, SyncPath};
pub use sync_service::{GatewayResponse, SyncTranslationService};
pub use translate::TranslationEngine;
pub use trigger::{AsyncTriggerProcessor, TriggerListener, TriggerOutcome};
