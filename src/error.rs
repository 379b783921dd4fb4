use reqwest::StatusCode;
use thiserror::Error;

use crate::auth::FieldErrors;

/// Shown when the server answered with a failure we could not read.
pub const GENERIC_SERVER_ERROR: &str = "The server could not complete the request";

/// Shown when no response was received at all.
pub const GENERIC_TRANSPORT_ERROR: &str = "Could not reach the server, please try again";

/// Failure of a single call through [`crate::http::ApiClient`].
#[derive(Debug, Error)]
pub enum ApiError {
    /// Non-2xx response. `message` is the body's `error` field when present.
    #[error("{message}")]
    Server { status: StatusCode, message: String },

    #[error("{}", GENERIC_TRANSPORT_ERROR)]
    Transport(#[source] reqwest::Error),

    /// 2xx response whose body did not have the expected shape.
    #[error("{}", GENERIC_SERVER_ERROR)]
    Decode(String),

    /// The request was never sent because its body could not be built.
    #[error("Could not encode the request: {0}")]
    Encode(String),
}

impl ApiError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Message suitable for an alert or inline field error.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials: {0}")]
    Invalid(FieldErrors),

    #[error("A submission is already in progress")]
    InFlight,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Failed to persist session: {0}")]
    Storage(#[from] StorageError),
}

impl AuthError {
    /// Top-level message for the form, if the error is not a per-field one.
    pub fn alert(&self) -> Option<String> {
        match self {
            AuthError::Invalid(_) | AuthError::InFlight => None,
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("No image selected")]
    NoFileSelected,

    #[error("An analysis is already in progress")]
    InFlight,

    #[error("The selected image changed while it was being analysed")]
    Superseded,

    #[error("Unsupported or corrupt image: {0}")]
    InvalidImage(String),

    #[error("Failed to read image: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl AnalyzeError {
    /// Failures that end in `AnalyzeStatus::Error`. The others leave the view untouched.
    pub fn shown_in_view(&self) -> bool {
        matches!(self, AnalyzeError::Api(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("Could not determine a config directory for session storage")]
    NoConfigDir,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_displays_server_message() {
        let err = ApiError::Server {
            status: StatusCode::UNAUTHORIZED,
            message: "Invalid token".to_string(),
        };
        assert_eq!(err.message(), "Invalid token");
        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn decode_error_uses_generic_message() {
        let err = ApiError::Decode("missing field".to_string());
        assert_eq!(err.message(), GENERIC_SERVER_ERROR);
        assert_eq!(err.status(), None);
    }

    #[test]
    fn only_api_failures_are_shown_in_view() {
        assert!(AnalyzeError::Api(ApiError::Decode("bad".to_string())).shown_in_view());
        assert!(!AnalyzeError::InFlight.shown_in_view());
        assert!(!AnalyzeError::NoFileSelected.shown_in_view());
        assert!(!AnalyzeError::Superseded.shown_in_view());
        assert!(!AnalyzeError::InvalidImage("truncated".to_string()).shown_in_view());
    }

    #[test]
    fn field_errors_have_no_alert() {
        assert!(AuthError::Invalid(FieldErrors::default()).alert().is_none());
        assert!(AuthError::InFlight.alert().is_none());
    }
}
