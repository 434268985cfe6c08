use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::db::StoreError;
use crate::models::booking::TransitionError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payment initiation failed")]
    PaymentInitiationFailed,

    #[error("gateway communication error: {0}")]
    GatewayCommunication(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<TransitionError> for AppError {
    fn from(e: TransitionError) -> Self {
        AppError::Validation(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            AppError::PaymentInitiationFailed => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::GatewayCommunication(detail) => {
                tracing::error!(error = %detail, "payment gateway unreachable");
                (
                    StatusCode::BAD_GATEWAY,
                    "could not reach the payment gateway".to_string(),
                )
            }
            AppError::Store(StoreError::Conflict { .. }) => {
                (StatusCode::CONFLICT, "booking was modified concurrently".to_string())
            }
            AppError::Store(_) => {
                tracing::error!(error = %self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}
