use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::config::LimitOptions;
use crate::languages;

/// Errors that abort a submission before any translation is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("format error: {0}")]
    Format(String),
}

impl JobError {
    pub fn code(&self) -> &'static str {
        match self {
            JobError::Validation(_) => "VALIDATION_ERROR",
            JobError::Format(_) => "FORMAT_ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOrigin {
    InteractiveText,
    UploadedFile,
}

impl JobOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOrigin::InteractiveText => "interactive_text",
            JobOrigin::UploadedFile => "uploaded_file",
        }
    }
}

/// Job wire contract shared by file uploads and the synchronous endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub source_language: String,
    pub target_language: String,
    pub texts: Vec<String>,
}

/// A validated, immutable translation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationJob {
    job_id: String,
    source_language: String,
    target_language: String,
    items: Vec<String>,
    submitted_at: DateTime<Utc>,
    origin: JobOrigin,
}

impl TranslationJob {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn source_language(&self) -> &str {
        &self.source_language
    }

    pub fn target_language(&self) -> &str {
        &self.target_language
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn origin(&self) -> JobOrigin {
        self.origin
    }

    pub fn to_request(&self) -> JobRequest {
        JobRequest {
            source_language: self.source_language.clone(),
            target_language: self.target_language.clone(),
            texts: self.items.clone(),
        }
    }
}

/// Turns raw submissions into validated jobs.
#[derive(Debug, Clone, Default)]
pub struct JobBuilder {
    limits: LimitOptions,
}

impl JobBuilder {
    pub fn new(limits: LimitOptions) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &LimitOptions {
        &self.limits
    }

    /// Text mode: one item per non-blank line, trimmed.
    pub fn from_text(&self, source: &str, target: &str, input: &str) -> Result<TranslationJob, JobError> {
        let items: Vec<String> = input
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        if items.is_empty() {
            return Err(JobError::Validation("no text to translate".into()));
        }

        self.finish(
            JobRequest {
                source_language: source.trim().to_string(),
                target_language: target.trim().to_string(),
                texts: items,
            },
            JobOrigin::InteractiveText,
            None,
        )
    }

    /// File mode: the uploaded bytes must hold the job wire contract.
    pub fn from_file(&self, bytes: &[u8]) -> Result<TranslationJob, JobError> {
        if bytes.len() > self.limits.max_payload_bytes {
            return Err(JobError::Validation(format!(
                "payload of {} bytes exceeds the {} byte limit",
                bytes.len(),
                self.limits.max_payload_bytes
            )));
        }

        let value: Value =
            serde_json::from_slice(bytes).map_err(|err| JobError::Format(format!("file is not valid JSON: {err}")))?;
        let request = parse_request_value(&value)?;
        self.finish(request, JobOrigin::UploadedFile, None)
    }

    /// Validates an already decoded request, e.g. one received by the
    /// synchronous endpoint or recovered from storage.
    pub fn from_request(
        &self,
        request: JobRequest,
        origin: JobOrigin,
        job_id: Option<String>,
        submitted_at: Option<DateTime<Utc>>,
    ) -> Result<TranslationJob, JobError> {
        let mut job = self.finish(request, origin, job_id)?;
        if let Some(at) = submitted_at {
            job.submitted_at = at;
        }
        Ok(job)
    }

    fn finish(&self, request: JobRequest, origin: JobOrigin, job_id: Option<String>) -> Result<TranslationJob, JobError> {
        validate_request(&request, &self.limits)?;
        Ok(TranslationJob {
            job_id: job_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            source_language: request.source_language,
            target_language: request.target_language,
            items: request.texts,
            submitted_at: Utc::now(),
            origin,
        })
    }
}

/// Decodes the wire contract from a JSON value, distinguishing missing
/// fields (validation) from malformed ones (format).
pub fn parse_request_value(value: &Value) -> Result<JobRequest, JobError> {
    let Some(object) = value.as_object() else {
        return Err(JobError::Format("job must be a JSON object".into()));
    };

    for field in ["source_language", "target_language", "texts"] {
        if !object.contains_key(field) {
            return Err(JobError::Validation(format!("missing required field: {field}")));
        }
    }

    let language = |field: &str| -> Result<String, JobError> {
        object[field]
            .as_str()
            .map(|value| value.trim().to_string())
            .ok_or_else(|| JobError::Format(format!("field '{field}' must be a string")))
    };
    let source_language = language("source_language")?;
    let target_language = language("target_language")?;

    let Some(raw_texts) = object["texts"].as_array() else {
        return Err(JobError::Format("field 'texts' must be a list".into()));
    };
    let texts = raw_texts
        .iter()
        .enumerate()
        .map(|(index, text)| {
            text.as_str()
                .map(str::to_string)
                .ok_or_else(|| JobError::Format(format!("text at index {index} must be a string")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(JobRequest {
        source_language,
        target_language,
        texts,
    })
}

pub fn validate_request(request: &JobRequest, limits: &LimitOptions) -> Result<(), JobError> {
    if request.source_language.is_empty() {
        return Err(JobError::Validation("missing required field: source_language".into()));
    }
    if request.target_language.is_empty() {
        return Err(JobError::Validation("missing required field: target_language".into()));
    }
    if !languages::is_supported(&request.source_language) {
        return Err(JobError::Validation(format!(
            "Unsupported source language: {}",
            request.source_language
        )));
    }
    if !languages::is_supported(&request.target_language) {
        return Err(JobError::Validation(format!(
            "Unsupported target language: {}",
            request.target_language
        )));
    }
    if request.texts.is_empty() {
        return Err(JobError::Validation("field 'texts' cannot be empty".into()));
    }
    if let Some((index, _)) = request
        .texts
        .iter()
        .enumerate()
        .find(|(_, text)| text.len() > limits.max_item_bytes)
    {
        return Err(JobError::Validation(format!(
            "text at index {index} exceeds {} bytes limit",
            limits.max_item_bytes
        )));
    }
    Ok(())
}
