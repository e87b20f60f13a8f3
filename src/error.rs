use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Transient store error: {0}")]
    Busy(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Requested slot overlaps an existing booking")]
    SlotConflict,

    #[error("Booking has already been paid")]
    AlreadyPaid,

    #[error("A payment attempt is already in progress")]
    PaymentInProgress,

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Payment error: {0}")]
    Payment(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("External service error: {0}")]
    External(String),
}

impl AppError {
    /// Lock contention in the store; the transaction may succeed if retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Busy(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Database(ref msg) => {
                tracing::error!("Database error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error occurred".to_string())
            }
            AppError::Busy(ref msg) => {
                tracing::error!("Store contention not resolved after retries: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Transient store error, please retry".to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            e @ (AppError::SlotConflict | AppError::AlreadyPaid | AppError::PaymentInProgress) => {
                (StatusCode::CONFLICT, e.to_string())
            }
            AppError::InvalidSignature => {
                tracing::warn!("Rejected webhook with invalid signature, possible forgery attempt");
                (StatusCode::BAD_REQUEST, "Invalid signature".to_string())
            }
            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::Payment(msg) => (StatusCode::PAYMENT_REQUIRED, msg),
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::External(ref msg) => {
                tracing::error!("External service error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

// SQLite primary result codes for lock contention (extended codes keep
// the primary code in their low byte).
const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            let primary = db_err
                .code()
                .and_then(|code| code.parse::<i64>().ok())
                .map(|code| code & 0xff);
            if matches!(primary, Some(SQLITE_BUSY) | Some(SQLITE_LOCKED)) {
                return AppError::Busy(err.to_string());
            }
        }
        AppError::Database(err.to_string())
    }
}
