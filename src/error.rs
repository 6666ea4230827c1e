use crate::crypto::CryptoError;
use thiserror::Error;

/// Application-wide error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Identity not found: {0}")]
    NotFound(String),

    #[error("Identity already exists: {0}")]
    AlreadyExists(String),

    /// Transport or storage cipher rejected the data. The message stays
    /// generic so callers cannot use it as a decryption oracle.
    #[error("Secret could not be decrypted")]
    Decryption,

    #[error("Invalid code format: expected 6 digits")]
    MalformedCode,

    #[error("Key initialization failed: {0}")]
    KeyInitialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found<S: Into<String>>(name: S) -> Self {
        Self::NotFound(name.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convert AppError to HTTP status codes for web responses
impl AppError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Crypto(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyExists(_) => StatusCode::BAD_REQUEST,
            Self::Decryption => StatusCode::BAD_REQUEST,
            Self::MalformedCode => StatusCode::UNPROCESSABLE_ENTITY,
            Self::KeyInitialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        // Internal details stay in the log.
        let message = match &self {
            Self::Database(_) | Self::Io(_) | Self::Crypto(_) | Self::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = serde_json::json!({
            "error": message,
            "code": status.as_u16()
        });
        (status, axum::Json(body)).into_response()
    }
}
