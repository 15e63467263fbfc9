use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

use crate::job::TranslationJob;

/// Reason attached to items when neither delivery path produced a result.
pub const NO_RESULT_REASON: &str = "no result from either path";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationItemResult {
    pub original_text: String,
    pub translated_text: Option<String>,
    pub index: usize,
    pub status: ItemStatus,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_source_language: Option<String>,
}

impl TranslationItemResult {
    pub fn success(
        index: usize,
        original_text: impl Into<String>,
        translated_text: impl Into<String>,
        detected_source_language: Option<String>,
    ) -> Self {
        Self {
            original_text: original_text.into(),
            translated_text: Some(translated_text.into()),
            index,
            status: ItemStatus::Success,
            error: None,
            detected_source_language,
        }
    }

    pub fn failure(index: usize, original_text: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            original_text: original_text.into(),
            translated_text: None,
            index,
            status: ItemStatus::Error,
            error: Some(reason.into()),
            detected_source_language: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ItemStatus::Success
    }

    /// Characters contributed to `total_characters_translated`.
    pub fn translated_chars(&self) -> usize {
        if !self.is_success() {
            return 0;
        }
        self.translated_text
            .as_deref()
            .map(|text| text.chars().count())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultMetadata {
    pub source_language: String,
    pub target_language: String,
    pub total_texts: usize,
    pub successful_translations: usize,
    pub failed_translations: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultSummary {
    pub success_rate: u32,
    pub total_characters_translated: usize,
}

/// Outcome of one service invocation. Statistics are derived from the items
/// at construction time and the value is never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobResult {
    job_id: String,
    request_metadata: ResultMetadata,
    translations: Vec<TranslationItemResult>,
    summary: ResultSummary,
}

impl JobResult {
    pub fn from_items(
        job_id: impl Into<String>,
        source_language: impl Into<String>,
        target_language: impl Into<String>,
        mut items: Vec<TranslationItemResult>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        items.sort_by_key(|item| item.index);

        let total_texts = items.len();
        let successful_translations = items.iter().filter(|item| item.is_success()).count();
        let failed_translations = total_texts - successful_translations;
        let total_characters_translated = items.iter().map(TranslationItemResult::translated_chars).sum();

        Self {
            job_id: job_id.into(),
            request_metadata: ResultMetadata {
                source_language: source_language.into(),
                target_language: target_language.into(),
                total_texts,
                successful_translations,
                failed_translations,
                timestamp,
            },
            translations: items,
            summary: ResultSummary {
                success_rate: success_rate(successful_translations, total_texts),
                total_characters_translated,
            },
        }
    }

    /// Builds a result for `job`, stamped with the job's submission time.
    pub fn for_job(job: &TranslationJob, items: Vec<TranslationItemResult>) -> Self {
        Self::from_items(
            job.job_id(),
            job.source_language(),
            job.target_language(),
            items,
            job.submitted_at(),
        )
    }

    /// Every item of `job` marked as failed with `reason`.
    pub fn all_failed(job: &TranslationJob, reason: &str) -> Self {
        let items = job
            .items()
            .iter()
            .enumerate()
            .map(|(index, text)| TranslationItemResult::failure(index, text.clone(), reason))
            .collect();
        Self::for_job(job, items)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn metadata(&self) -> &ResultMetadata {
        &self.request_metadata
    }

    pub fn items(&self) -> &[TranslationItemResult] {
        &self.translations
    }

    pub fn summary(&self) -> &ResultSummary {
        &self.summary
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// `round(successful / total * 100)`, zero for an empty batch.
pub fn success_rate(successful: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((successful as f64 / total as f64) * 100.0).round() as u32
}

/// Which delivery path the reconciled items came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum ResultSource {
    Sync { matcher: &'static str },
    Async { key: String, matcher: &'static str },
    Synthesized,
}

/// The single authoritative answer for a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciledResult {
    source: ResultSource,
    #[serde(flatten)]
    result: JobResult,
}

impl ReconciledResult {
    pub(crate) fn new(source: ResultSource, result: JobResult) -> Self {
        Self { source, result }
    }

    pub fn source(&self) -> &ResultSource {
        &self.source
    }

    pub fn result(&self) -> &JobResult {
        &self.result
    }
}

impl Deref for ReconciledResult {
    type Target = JobResult;

    fn deref(&self) -> &Self::Target {
        &self.result
    }
}
