//! Synchronous translation service: validate, translate every item, answer in
//! the same call.

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::TranslationBackend;
use crate::config::DispatchOptions;
use crate::identity::CallerIdentity;
use crate::job::{parse_request_value, JobBuilder, JobError, JobOrigin, TranslationJob};
use crate::result::JobResult;
use crate::sync_path::{SyncCallError, SyncPath};
use crate::time::rfc3339_now;
use crate::translate::TranslationEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Validating,
    Translating,
    Aggregating,
    Done,
    Failed,
}

/// API-gateway style response: JSON `body` serialized as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl GatewayResponse {
    pub fn ok(body: String) -> Self {
        Self {
            status_code: 200,
            headers: cors_headers(),
            body,
        }
    }

    pub fn error(status_code: u16, message: &str) -> Self {
        let body = json!({
            "error": true,
            "message": message,
            "timestamp": rfc3339_now(),
        });
        Self {
            status_code,
            headers: cors_headers(),
            body: body.to_string(),
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "statusCode": self.status_code,
            "headers": self.headers,
            "body": self.body,
        })
    }
}

fn cors_headers() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("Content-Type".to_string(), "application/json".to_string()),
        ("Access-Control-Allow-Origin".to_string(), "*".to_string()),
        (
            "Access-Control-Allow-Headers".to_string(),
            "Content-Type,Authorization,X-Api-Key".to_string(),
        ),
        ("Access-Control-Allow-Methods".to_string(), "GET,POST,OPTIONS".to_string()),
    ])
}

#[derive(Clone)]
pub struct SyncTranslationService {
    engine: TranslationEngine,
    builder: JobBuilder,
}

impl SyncTranslationService {
    pub fn new(backend: Arc<dyn TranslationBackend>, builder: JobBuilder, dispatch: &DispatchOptions) -> Self {
        Self {
            engine: TranslationEngine::new(backend, dispatch),
            builder,
        }
    }

    pub fn with_engine(engine: TranslationEngine, builder: JobBuilder) -> Self {
        Self { engine, builder }
    }

    fn transition(&self, subject: &str, state: ServiceState) {
        debug!("sync service {}: {:?}", subject, state);
    }

    /// Translates an already validated job. Item failures are recorded on the
    /// items; this never fails.
    pub async fn translate_job(&self, job: &TranslationJob) -> JobResult {
        self.transition(job.job_id(), ServiceState::Translating);
        let items = self.engine.translate_job(job, None).await;

        self.transition(job.job_id(), ServiceState::Aggregating);
        let result = JobResult::for_job(job, items);
        info!(
            "job {} translated: {}/{} items via {}",
            job.job_id(),
            result.metadata().successful_translations,
            result.metadata().total_texts,
            self.engine.backend_name()
        );

        self.transition(job.job_id(), ServiceState::Done);
        result
    }

    /// Validates a raw request and translates it. Only validation and format
    /// errors are returned.
    pub async fn translate_request(&self, request: &Value, origin: JobOrigin) -> Result<JobResult, JobError> {
        let subject = request_subject(request);
        self.transition(&subject, ServiceState::Validating);
        let job = parse_request_value(request)
            .and_then(|parsed| self.builder.from_request(parsed, origin, None, None))
            .map_err(|err| {
                self.transition(&subject, ServiceState::Failed);
                err
            })?;
        Ok(self.translate_job(&job).await)
    }

    /// Entry point for gateway events and direct invocations. A gateway event
    /// carries the request in `body` (JSON string or object); anything else is
    /// treated as the request itself.
    pub async fn handle_request(&self, event: &Value) -> GatewayResponse {
        if event.get("httpMethod").and_then(Value::as_str) == Some("OPTIONS") {
            return GatewayResponse::ok(json!({"message": "CORS preflight"}).to_string());
        }

        let is_gateway_event =
            event.get("httpMethod").is_some() || event.get("requestContext").is_some() || event.get("body").is_some();
        let request = if is_gateway_event {
            let identity = event
                .get("requestContext")
                .map(CallerIdentity::from_request_context)
                .unwrap_or_default();
            debug!("gateway request from {}", identity);
            match gateway_body(event) {
                Ok(Some(body)) => body,
                Ok(None) => return GatewayResponse::error(400, "Request body is required"),
                Err(err) => return GatewayResponse::error(400, &err.to_string()),
            }
        } else {
            event.clone()
        };

        match self.translate_request(&request, JobOrigin::InteractiveText).await {
            Ok(result) => match result.to_json() {
                Ok(body) => GatewayResponse::ok(body),
                Err(err) => GatewayResponse::error(500, &format!("failed to serialize result: {err}")),
            },
            Err(err) => {
                warn!("rejected request: {}", err);
                GatewayResponse::error(400, &err.to_string())
            }
        }
    }
}

/// Language pair of a request that has no job id yet, e.g. `request en->es`.
fn request_subject(request: &Value) -> String {
    let field = |name: &str| request.get(name).and_then(Value::as_str).unwrap_or("?").to_string();
    format!("request {}->{}", field("source_language"), field("target_language"))
}

fn gateway_body(event: &Value) -> Result<Option<Value>, JobError> {
    match event.get("body") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) if raw.trim().is_empty() => Ok(None),
        Some(Value::String(raw)) => serde_json::from_str(raw)
            .map(Some)
            .map_err(|err| JobError::Format(format!("request body is not valid JSON: {err}"))),
        Some(other) => Ok(Some(other.clone())),
    }
}

/// In-process sync path: the service answers with its gateway envelope.
#[async_trait]
impl SyncPath for SyncTranslationService {
    fn name(&self) -> &str {
        "in_process"
    }

    async fn call(&self, job: &TranslationJob) -> Result<Value, SyncCallError> {
        let result = self.translate_job(job).await;
        let body = result
            .to_json()
            .map_err(|err| SyncCallError::Decode(err.to_string()))?;
        Ok(GatewayResponse::ok(body).to_value())
    }
}
