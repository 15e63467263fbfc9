//! Deterministic object keys.
//!
//! The response key is a pure function of the job key, so the reconciler
//! fetches the async output directly instead of searching for it.

use crate::config::StorageOptions;

const JSON_SUFFIX: &str = ".json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    jobs_prefix: String,
    responses_prefix: String,
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::from_options(&StorageOptions::default())
    }
}

impl KeyLayout {
    pub fn new(jobs_prefix: impl Into<String>, responses_prefix: impl Into<String>) -> Self {
        Self {
            jobs_prefix: jobs_prefix.into(),
            responses_prefix: responses_prefix.into(),
        }
    }

    pub fn from_options(options: &StorageOptions) -> Self {
        Self::new(options.jobs_prefix.trim(), options.responses_prefix.trim())
    }

    pub fn jobs_prefix(&self) -> &str {
        &self.jobs_prefix
    }

    pub fn responses_prefix(&self) -> &str {
        &self.responses_prefix
    }

    pub fn job_key(&self, job_id: &str) -> String {
        format!("{}{}{}", self.jobs_prefix, sanitize_segment(job_id), JSON_SUFFIX)
    }

    /// `None` when the key does not name a JSON object in the jobs area.
    pub fn job_stem<'a>(&self, job_key: &'a str) -> Option<&'a str> {
        let stem = job_key
            .strip_prefix(self.jobs_prefix.as_str())?
            .strip_suffix(JSON_SUFFIX)?;
        if stem.is_empty() {
            None
        } else {
            Some(stem)
        }
    }

    pub fn is_job_key(&self, key: &str) -> bool {
        self.job_stem(key).is_some()
    }

    pub fn response_key_for_job_key(&self, job_key: &str) -> Option<String> {
        self.job_stem(job_key)
            .map(|stem| format!("{}{}{}", self.responses_prefix, stem, JSON_SUFFIX))
    }

    pub fn response_key(&self, job_id: &str) -> String {
        format!("{}{}{}", self.responses_prefix, sanitize_segment(job_id), JSON_SUFFIX)
    }

    /// Job id recovered from a response key, the inverse of [`KeyLayout::response_key`].
    pub fn response_stem<'a>(&self, response_key: &'a str) -> Option<&'a str> {
        response_key
            .strip_prefix(self.responses_prefix.as_str())?
            .strip_suffix(JSON_SUFFIX)
            .filter(|stem| !stem.is_empty())
    }
}

fn sanitize_segment(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
