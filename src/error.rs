use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Error taxonomy shared by every component.
///
/// Kinds map to behaviour, not to call sites: validation errors are never
/// retried, provider errors are retried only inside the provider adapter,
/// and duplicate-key conflicts never surface (the store resolves them by
/// upsert).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("symbol '{0}' not found")]
    SymbolNotFound(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("broker error: {0}")]
    Broker(String),

    /// Cooperative cancellation observed at a safe point. Not a failure:
    /// the job row already carries status='cancelled'.
    #[error("job cancelled")]
    Cancelled,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) | Self::SymbolNotFound(_) => StatusCode::NOT_FOUND,
            Self::Provider(_) | Self::RateLimited(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database(_) | Self::Config(_) | Self::Broker(_) | Self::Cancelled => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<garde::Report> for Error {
    fn from(report: garde::Report) -> Self {
        Self::Validation(report.to_string())
    }
}
