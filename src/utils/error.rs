use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Login element not found: {element} ({selector})")]
    AuthElementMissing { element: String, selector: String },

    #[error("Consent checkbox not found: {selector}")]
    ConsentElementMissing { selector: String },

    #[error("Timed out waiting for {element} ({selector})")]
    NavigationTimeout { element: String, selector: String },

    #[error("Calendar extraction failed: {0}")]
    ExtractionFailure(String),

    #[error("Notification failed: {0}")]
    NotificationFailure(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Telemetry setup failed: {0}")]
    Telemetry(String),
}

impl AppError {
    pub fn auth_missing(element: &str, selector: impl ToString) -> Self {
        AppError::AuthElementMissing {
            element: element.to_string(),
            selector: selector.to_string(),
        }
    }

    pub fn navigation_timeout(element: &str, selector: impl ToString) -> Self {
        AppError::NavigationTimeout {
            element: element.to_string(),
            selector: selector.to_string(),
        }
    }

    /// Wraps a driver-level failure (the automation library's own error type).
    pub fn browser(err: impl std::fmt::Display) -> Self {
        AppError::Browser(err.to_string())
    }

    /// Stable label for structured logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Http(_) => "http",
            AppError::Config(_) => "config",
            AppError::Serialization(_) => "serialization",
            AppError::Io(_) => "io",
            AppError::Browser(_) => "browser",
            AppError::AuthElementMissing { .. } => "auth_element_missing",
            AppError::ConsentElementMissing { .. } => "consent_element_missing",
            AppError::NavigationTimeout { .. } => "navigation_timeout",
            AppError::ExtractionFailure(_) => "extraction_failure",
            AppError::NotificationFailure(_) => "notification_failure",
            AppError::Validation(_) => "validation",
            AppError::Telemetry(_) => "telemetry",
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(format!("{}", err))
    }
}

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
