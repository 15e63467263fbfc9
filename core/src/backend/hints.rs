use httpdate::parse_http_date;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::Value;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryHintSource {
    RetryAfterHeader,
    ErrorBody,
}

impl RetryHintSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryHintSource::RetryAfterHeader => "retry-after",
            RetryHintSource::ErrorBody => "error-body",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryHint {
    pub delay: Duration,
    pub source: RetryHintSource,
}

/// Looks for a backend supplied delay, preferring the `Retry-After` header
/// over a `retryDelay` / `retry_after_seconds` field in the error body.
pub fn extract_retry_hint(headers: &HeaderMap, body: &str) -> Option<RetryHint> {
    parse_retry_after_header(headers).or_else(|| parse_error_body_hint(body))
}

pub fn parse_retry_after_header(headers: &HeaderMap) -> Option<RetryHint> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?;
    let delay = parse_retry_after(raw, SystemTime::now())?;
    Some(RetryHint {
        delay,
        source: RetryHintSource::RetryAfterHeader,
    })
}

/// Parses the value of an HTTP `Retry-After` header.
///
/// Returns `None` when parsing fails.
pub fn parse_retry_after(value: &str, now: SystemTime) -> Option<Duration> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    if let Ok(instant) = parse_http_date(trimmed) {
        return Some(instant.duration_since(now).unwrap_or(Duration::ZERO));
    }

    None
}

fn parse_error_body_hint(body: &str) -> Option<RetryHint> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("error").unwrap_or(&value);

    let delay = if let Some(seconds) = error.get("retry_after_seconds").and_then(Value::as_f64) {
        seconds_to_duration(seconds)?
    } else {
        parse_delay_string(error.get("retryDelay")?.as_str()?)?
    };

    Some(RetryHint {
        delay,
        source: RetryHintSource::ErrorBody,
    })
}

/// Parses delays such as `"3s"` or `"1.5s"`.
pub fn parse_delay_string(value: &str) -> Option<Duration> {
    let stripped = value.trim().strip_suffix('s')?;
    seconds_to_duration(stripped.parse::<f64>().ok()?)
}

fn seconds_to_duration(seconds: f64) -> Option<Duration> {
    if !seconds.is_finite() || seconds.is_sign_negative() {
        return None;
    }
    Some(Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn parse_retry_after_seconds_header() {
        let duration = parse_retry_after("120", SystemTime::now()).unwrap();
        assert_eq!(duration, Duration::from_secs(120));
    }

    #[test]
    fn parse_retry_after_http_date() {
        let now = SystemTime::now();
        let later = now + Duration::from_secs(30);
        let header = httpdate::fmt_http_date(later);
        let parsed = parse_retry_after(&header, now).unwrap();
        assert!(parsed.as_secs() >= 29 && parsed.as_secs() <= 30);
    }

    #[test]
    fn past_http_date_means_no_wait() {
        let now = SystemTime::now();
        let earlier = now - Duration::from_secs(30);
        let parsed = parse_retry_after(&httpdate::fmt_http_date(earlier), now).unwrap();
        assert_eq!(parsed, Duration::ZERO);
    }

    #[test]
    fn header_wins_over_body() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        let hint = extract_retry_hint(&headers, r#"{"error":{"retryDelay":"2s"}}"#).unwrap();
        assert_eq!(hint.delay, Duration::from_secs(7));
        assert_eq!(hint.source, RetryHintSource::RetryAfterHeader);
    }

    #[test]
    fn reads_body_hints() {
        let headers = HeaderMap::new();
        let nested = extract_retry_hint(&headers, r#"{"error":{"retryDelay":"1.5s"}}"#).unwrap();
        assert_eq!(nested.delay.as_millis(), 1500);

        let flat = extract_retry_hint(&headers, r#"{"retry_after_seconds": 4}"#).unwrap();
        assert_eq!(flat.delay, Duration::from_secs(4));
        assert_eq!(flat.source.as_str(), "error-body");

        assert!(extract_retry_hint(&headers, "not json").is_none());
    }

    #[test]
    fn rejects_negative_delays() {
        assert!(parse_delay_string("-1s").is_none());
        assert!(parse_delay_string("3m").is_none());
    }
}
