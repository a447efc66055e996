//! Error types for tenant-proxy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias for tenant-proxy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for tenant-proxy.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// A request body the HTTP layer refused before it was parsed, with the
    /// status that layer chose (413, 415, ...).
    #[error("Invalid request: {message}")]
    Rejected { status: StatusCode, message: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// Engine-specific error code (SQLite extended result code).
        code: Option<String>,
    },

    #[error("Failed to open database for tenant '{tenant}': {message}")]
    Resource { tenant: String, message: String },

    #[error("Transaction failed at statement {index}: {message}")]
    Transaction {
        index: usize,
        message: String,
        code: Option<String>,
        rolled_back: bool,
    },

    #[error("Queue for tenant '{tenant}' is full ({depth} jobs pending)")]
    Busy { tenant: String, depth: usize },

    #[error("Job for tenant '{tenant}' waited {waited_ms}ms in queue and was not started")]
    Expired { tenant: String, waited_ms: u64 },

    #[error("Service is shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap a statement failure that happened inside a transaction.
    pub fn transaction(index: usize, source: sqlx::Error, rolled_back: bool) -> Self {
        let (message, code) = describe_sqlx(&source);
        Error::Transaction {
            index,
            message,
            code,
            rolled_back,
        }
    }

    /// Short machine-readable kind used in the wire envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::BadRequest(_) | Error::Rejected { .. } => "client",
            Error::Database { .. } => "database",
            Error::Resource { .. } => "resource",
            Error::Transaction { .. } => "transaction",
            Error::Busy { .. } => "busy",
            Error::Expired { .. } => "expired",
            Error::ShuttingDown => "shutting_down",
            Error::Config(_) | Error::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Rejected { status, .. } => *status,
            Error::Database { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Transaction { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Resource { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::Busy { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Expired { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Error::Config(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Split a sqlx error into a message and, for engine errors, its code.
fn describe_sqlx(err: &sqlx::Error) -> (String, Option<String>) {
    match err {
        sqlx::Error::Database(db) => (
            db.message().to_string(),
            db.code().map(|code| code.into_owned()),
        ),
        other => (other.to_string(), None),
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        let (message, code) = describe_sqlx(&err);
        Error::Database { message, code }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let mut error = serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
            "code": status.as_u16(),
        });

        match &self {
            Error::Transaction {
                index,
                code,
                rolled_back,
                ..
            } => {
                error["statementIndex"] = serde_json::json!(index);
                error["rolledBack"] = serde_json::json!(rolled_back);
                if let Some(code) = code {
                    error["engineCode"] = serde_json::json!(code);
                }
            }
            Error::Database {
                code: Some(code), ..
            } => {
                error["engineCode"] = serde_json::json!(code);
            }
            _ => {}
        }

        (status, axum::Json(serde_json::json!({ "error": error }))).into_response()
    }
}
