use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::error::AppError;

/// Portal login. Loaded once at startup and never mutated.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub identity: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Profile id selecting which appointment calendar to query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScheduleTarget(String);

impl ScheduleTarget {
    pub fn new(id: impl Into<String>) -> Result<Self, AppError> {
        let id = id.into();
        if is_valid_target(&id) {
            Ok(Self(id))
        } else {
            Err(AppError::Validation(format!(
                "schedule target '{}' must be non-empty and contain only letters, digits, '-' or '_'",
                id
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The id is spliced into a URL path segment.
pub fn is_valid_target(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl TryFrom<String> for ScheduleTarget {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ScheduleTarget::new(value)
    }
}

impl From<ScheduleTarget> for String {
    fn from(target: ScheduleTarget) -> Self {
        target.0
    }
}

impl fmt::Display for ScheduleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
