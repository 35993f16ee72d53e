use crate::engine::EngineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rollcall_core::{CaptureError, ErrorKind};
use rollcall_store::DbError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Engine(#[from] EngineError),
    #[error("invalid image: {0}")]
    Capture(#[from] CaptureError),
    #[error("{0}")]
    Store(#[from] DbError),
    #[error("{0}")]
    BadRequest(String),
    #[error("this device is not allowed to use the kiosk")]
    Forbidden,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ApiError::Engine(err) => Some(err.kind()),
            ApiError::Capture(_) => Some(ErrorKind::InvalidImage),
            ApiError::Store(DbError::InvalidInput(_) | DbError::NotFound(_)) => None,
            ApiError::Store(_) | ApiError::Internal(_) => Some(ErrorKind::StorageFailure),
            ApiError::BadRequest(_) | ApiError::Forbidden => None,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(err) => match err.kind() {
                ErrorKind::InvalidIdentity => StatusCode::NOT_FOUND,
                ErrorKind::AlreadyEnrolled => StatusCode::CONFLICT,
                ErrorKind::NoFaceDetected | ErrorKind::Unrecognized => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::InvalidImage => StatusCode::BAD_REQUEST,
                ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                ErrorKind::StorageFailure | ErrorKind::ResolutionFallback => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Capture(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(DbError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            ApiError::Store(DbError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Store(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }

        let body = json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });
        (status, Json(body)).into_response()
    }
}
