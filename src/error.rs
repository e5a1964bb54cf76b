use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{exchange} page {page} timed out after {secs}s")]
    Timeout {
        exchange: String,
        page: usize,
        secs: u64,
    },

    #[error("Unexpected payload: {0}")]
    Payload(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Classification error: {0}")]
    Classification(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Whether a fetch attempt that failed with this error is worth retrying.
    ///
    /// Timeouts, connection failures and HTTP 408/425/429/5xx are transient.
    /// Other 4xx statuses and malformed payloads are not.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Timeout { .. } => true,
            AppError::Http(e) => match e.status() {
                Some(status) => matches!(status.as_u16(), 408 | 425 | 429 | 500..=599),
                None => !e.is_decode() && !e.is_builder(),
            },
            _ => false,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
