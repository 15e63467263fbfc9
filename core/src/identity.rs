use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

const ANONYMOUS: &str = "anonymous";

/// Caller identity as supplied by the identity provider. Only ever used as
/// metadata on stored jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallerIdentity(String);

impl CallerIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        if id.trim().is_empty() {
            Self::anonymous()
        } else {
            Self(id.trim().to_string())
        }
    }

    pub fn anonymous() -> Self {
        Self(ANONYMOUS.to_string())
    }

    pub fn is_anonymous(&self) -> bool {
        self.0 == ANONYMOUS
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reads the subject out of a request context: `authorizer.claims.sub`,
    /// then `authorizer.lambda.sub`, then `authorizer.principalId`.
    pub fn from_request_context(context: &Value) -> Self {
        let Some(authorizer) = context.get("authorizer") else {
            return Self::anonymous();
        };

        let subject = if let Some(claims) = authorizer.get("claims") {
            claims.get("sub")
        } else if let Some(lambda) = authorizer.get("lambda") {
            lambda.get("sub")
        } else {
            authorizer.get("principalId")
        };

        subject
            .and_then(Value::as_str)
            .map(Self::new)
            .unwrap_or_else(Self::anonymous)
    }
}

impl Default for CallerIdentity {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
