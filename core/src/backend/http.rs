use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use super::hints::extract_retry_hint;
use super::{BackendError, BackendRequest, BackendTranslation, TranslationBackend};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// JSON-over-HTTP translation backend.
///
/// `POST {endpoint}` with `{text, source_language, target_language}`; a 2xx
/// answer carries `{translated_text, detected_source_language?}`.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

impl HttpBackend {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|err| BackendError::Unreachable {
                message: format!("failed to build http client: {err}"),
            })?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn classify_failure(status: StatusCode, retry_after: Option<Duration>, body: &str, request: &BackendRequest) -> BackendError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|value| value.message.clone())
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
    let code = parsed.and_then(|value| value.code).unwrap_or_default();

    if status == StatusCode::TOO_MANY_REQUESTS {
        return BackendError::Throttled {
            message,
            retry_after,
        };
    }
    if status == StatusCode::REQUEST_TIMEOUT || status.is_server_error() {
        return BackendError::Transient { message };
    }
    if code.eq_ignore_ascii_case("UnsupportedLanguagePair") || code.eq_ignore_ascii_case("unsupported_language_pair") {
        return BackendError::UnsupportedLanguagePair {
            source_language: request.source_language.clone(),
            target_language: request.target_language.clone(),
        };
    }
    BackendError::Rejected { message }
}

#[async_trait]
impl TranslationBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn translate(&self, request: &BackendRequest) -> Result<BackendTranslation, BackendError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                BackendError::Transient {
                    message: format!("request timed out: {err}"),
                }
            } else {
                BackendError::Unreachable {
                    message: err.to_string(),
                }
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(|err| BackendError::Transient {
            message: format!("failed to read response body: {err}"),
        })?;

        if !status.is_success() {
            let retry_after = extract_retry_hint(&headers, &body).map(|hint| hint.delay);
            debug!("backend answered {} for {} chars", status, request.text.len());
            return Err(classify_failure(status, retry_after, &body, request));
        }

        serde_json::from_str::<BackendTranslation>(&body).map_err(|err| BackendError::Transient {
            message: format!("malformed backend response: {err}"),
        })
    }
}
