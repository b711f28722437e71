//! Error types for the asset service and their HTTP mapping.

use assetuploader_scheduler::SchedulerError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

/// Errors that can occur while managing assets.
#[derive(Debug, Error)]
pub enum AssetError {
    /// The request was malformed.
    #[error("{0}")]
    BadInput(String),

    /// The asset (or its bucket) does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The asset is not in a state that allows the operation.
    #[error("{0}")]
    Conflict(String),

    /// Storage or metadata failure.
    #[error("internal error: {0}")]
    Internal(String),

    /// The confirmation job could not be registered.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl AssetError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AssetError::BadInput(_) => StatusCode::BAD_REQUEST,
            AssetError::NotFound(_) => StatusCode::NOT_FOUND,
            AssetError::Conflict(_) => StatusCode::CONFLICT,
            AssetError::Internal(_) | AssetError::Scheduler(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AssetError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal details stay in the logs
        let message = if status.is_server_error() {
            error!(error = %self, "request failed");
            "Internal Server Error".to_string()
        } else {
            warn!(error = %self, status = status.as_u16(), "request rejected");
            self.to_string()
        };

        (status, Json(message)).into_response()
    }
}
