//! Managed translation backend seam.
//!
//! The backend is single-item and synchronous from the pipeline's point of
//! view: one text in, one translated text out, or a classified error.

pub mod hints;
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use http::HttpBackend;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendRequest {
    pub text: String,
    pub source_language: String,
    pub target_language: String,
}

impl BackendRequest {
    pub fn new(text: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_language: source.into(),
            target_language: target.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendTranslation {
    pub translated_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_source_language: Option<String>,
}

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("backend throttled the request: {message}")]
    Throttled {
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("transient backend failure: {message}")]
    Transient { message: String },
    #[error("backend unreachable: {message}")]
    Unreachable { message: String },
    #[error("backend rejected the request: {message}")]
    Rejected { message: String },
    #[error("unsupported language pair: {source_language} -> {target_language}")]
    UnsupportedLanguagePair {
        source_language: String,
        target_language: String,
    },
}

impl BackendError {
    /// Throttling, transient and connectivity failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::Throttled { .. }
                | BackendError::Transient { .. }
                | BackendError::Unreachable { .. }
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BackendError::Throttled { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            BackendError::Throttled { .. } => "THROTTLED",
            BackendError::Transient { .. } => "TRANSIENT",
            BackendError::Unreachable { .. } => "UNREACHABLE",
            BackendError::Rejected { .. } => "REJECTED",
            BackendError::UnsupportedLanguagePair { .. } => "UNSUPPORTED_LANGUAGE_PAIR",
        }
    }
}

#[async_trait]
pub trait TranslationBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn translate(&self, request: &BackendRequest) -> Result<BackendTranslation, BackendError>;
}
