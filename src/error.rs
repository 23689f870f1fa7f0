//! Error taxonomy: service rejections, settlement outcomes, and HTTP mapping.

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::dao::storage::StorageError;

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Operation cannot be performed in the current phase or state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Bid or price exceeds the team's available credits.
    #[error("insufficient credits")]
    InsufficientCredits,
    /// Price would leave the roster without the mandatory credit reserve.
    #[error("roster budget rule violated")]
    RosterRule,
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {err}"))
    }
}

/// Outcome codes of a settlement attempt.
///
/// The no-op variants are not failures: a retried finalize against an
/// already-settled sale must stay silent so duplicate triggers (timer plus
/// explicit request) cannot double-charge.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FinalizeError {
    /// No pending sale row exists to settle.
    #[error("no pending sale")]
    NothingPending,
    /// The pending row was already settled.
    #[error("sale already finalized")]
    AlreadyFinalized,
    /// The winning team no longer exists.
    #[error("winning team is gone")]
    TeamMissing,
    /// The winning team cannot cover the price.
    #[error("insufficient credits")]
    InsufficientCredits {
        /// Team that failed the credit check.
        team_id: String,
    },
    /// Settlement would break the per-slot credit reserve.
    #[error("roster budget rule violated")]
    RosterRule {
        /// Team that failed the roster check.
        team_id: String,
    },
}

impl FinalizeError {
    /// Whether this outcome is a silent no-op rather than a genuine failure.
    pub fn is_noop(&self) -> bool {
        matches!(
            self,
            FinalizeError::NothingPending | FinalizeError::AlreadyFinalized
        )
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::InsufficientCredits => {
                AppError::Conflict("insufficient credits".into())
            }
            ServiceError::RosterRule => {
                AppError::Conflict("roster budget rule violated".into())
            }
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
