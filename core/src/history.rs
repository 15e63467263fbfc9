//! Recent jobs and results, read from object metadata without fetching bodies.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::keys::KeyLayout;
use crate::storage::{ObjectStore, ObjectSummary, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentEntry {
    pub key: String,
    pub job_id: String,
    pub last_modified: DateTime<Utc>,
    pub source_language: Option<String>,
    pub target_language: Option<String>,
    pub total_texts: Option<usize>,
    pub success_rate: Option<u32>,
}

pub async fn list_recent_jobs(
    store: &dyn ObjectStore,
    layout: &KeyLayout,
    window: Duration,
) -> Result<Vec<RecentEntry>, StoreError> {
    let summaries = store.list(layout.jobs_prefix(), Some(window)).await?;
    Ok(summaries
        .into_iter()
        .filter_map(|summary| {
            let job_id = layout.job_stem(&summary.key)?.to_string();
            Some(entry(summary, job_id, "text-count"))
        })
        .collect())
}

pub async fn list_recent_results(
    store: &dyn ObjectStore,
    layout: &KeyLayout,
    window: Duration,
) -> Result<Vec<RecentEntry>, StoreError> {
    let summaries = store.list(layout.responses_prefix(), Some(window)).await?;
    Ok(summaries
        .into_iter()
        .filter_map(|summary| {
            let job_id = layout.response_stem(&summary.key)?.to_string();
            Some(entry(summary, job_id, "texts-count"))
        })
        .collect())
}

fn entry(summary: ObjectSummary, job_id: String, count_key: &str) -> RecentEntry {
    let meta = &summary.metadata;
    RecentEntry {
        job_id,
        source_language: meta.get("source-language").cloned(),
        target_language: meta.get("target-language").cloned(),
        total_texts: meta.get(count_key).and_then(|value| value.parse().ok()),
        success_rate: meta.get("success-rate").and_then(|value| value.parse().ok()),
        last_modified: summary.last_modified,
        key: summary.key,
    }
}
