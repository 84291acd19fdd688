use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::Error as SqlxError;
use thiserror::Error as ThisError;

use crate::db::migrate::MigrationFailure;

// Primary SQLite result codes (extended codes carry these in the low byte).
const SQLITE_IOERR: i32 = 10;
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_READONLY: i32 = 8;
const SQLITE_CORRUPT: i32 = 11;
const SQLITE_FULL: i32 = 13;
const SQLITE_CANTOPEN: i32 = 14;
const SQLITE_NOTADB: i32 = 26;

#[derive(Debug, ThisError)]
pub enum TapError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Migration failed for {} field(s): {}", .0.len(), describe_failures(.0))]
    MigrationFailed(Vec<MigrationFailure>),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Store busy: {0}")]
    StoreBusy(String),

    #[error("Database error: {0}")]
    DatabaseError(SqlxError),
}

impl TapError {
    pub fn validation(msg: impl Into<String>) -> Self {
        TapError::Validation(msg.into())
    }

    /// Only lock contention is worth retrying; everything else is deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TapError::StoreBusy(_))
    }

    /// Re-label anything but contention as a startup-fatal storage problem.
    pub(crate) fn into_unavailable(self, context: &str) -> Self {
        match self {
            TapError::StoreBusy(_) | TapError::StorageUnavailable(_) => self,
            other => TapError::StorageUnavailable(format!("{context}: {other}")),
        }
    }
}

fn describe_failures(failures: &[MigrationFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

enum SqlxClass {
    Busy(String),
    Unavailable(String),
    Other,
}

fn classify(e: &SqlxError) -> SqlxClass {
    match e {
        SqlxError::PoolTimedOut => {
            SqlxClass::Busy("timed out waiting for a store connection".to_string())
        }
        SqlxError::PoolClosed | SqlxError::Io(_) => SqlxClass::Unavailable(e.to_string()),
        SqlxError::Database(db) => {
            let primary = db
                .code()
                .and_then(|c| c.parse::<i32>().ok())
                .map(|c| c & 0xff);
            match primary {
                Some(SQLITE_BUSY | SQLITE_LOCKED) => SqlxClass::Busy(db.message().to_string()),
                Some(
                    SQLITE_IOERR | SQLITE_READONLY | SQLITE_CORRUPT | SQLITE_FULL
                    | SQLITE_CANTOPEN | SQLITE_NOTADB,
                ) => SqlxClass::Unavailable(db.message().to_string()),
                _ => SqlxClass::Other,
            }
        }
        _ => SqlxClass::Other,
    }
}

impl From<SqlxError> for TapError {
    fn from(e: SqlxError) -> Self {
        match classify(&e) {
            SqlxClass::Busy(msg) => TapError::StoreBusy(msg),
            SqlxClass::Unavailable(msg) => TapError::StorageUnavailable(msg),
            SqlxClass::Other => TapError::DatabaseError(e),
        }
    }
}

impl IntoResponse for TapError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = match &self {
            TapError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            TapError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            TapError::PayloadTooLarge { .. } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                self.to_string(),
            ),
            TapError::StoreBusy(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "STORE_BUSY",
                "The store is busy; retry shortly.".to_string(),
            ),
            TapError::StorageUnavailable(_)
            | TapError::MigrationFailed(_)
            | TapError::DatabaseError(_) => {
                tracing::error!(error = %self, "request failed on storage");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred.".to_string(),
                )
            }
        };
        let body = ApiErrorResponse {
            error: ApiErrorBody {
                code: code.to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

/// Standardized API error response body
#[derive(Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}
