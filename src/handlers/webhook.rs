use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::errors::AppError;
use crate::services::reconciliation::{self, PaymentState, WebhookEvent};
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

pub fn sign_payload(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    let result = mac.finalize().into_bytes();
    Some(base64::engine::general_purpose::STANDARD.encode(result))
}

fn validate_signature(secret: &str, signature: &str, body: &[u8]) -> bool {
    let Ok(provided) = base64::engine::general_purpose::STANDARD.decode(signature) else {
        return false;
    };
    let mut mac = match Hmac::<Sha1>::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

// POST /api/payment/webhook
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Skip signature validation if no secret is configured (dev mode)
    if !state.config.webhook_secret.is_empty() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if signature.is_empty() {
            tracing::warn!("missing webhook signature header");
            return (StatusCode::FORBIDDEN, "Missing signature").into_response();
        }

        if !validate_signature(&state.config.webhook_secret, signature, &body) {
            tracing::warn!("invalid webhook signature");
            return (StatusCode::FORBIDDEN, "Invalid signature").into_response();
        }
    }

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            return AppError::Validation(format!("malformed webhook body: {e}")).into_response();
        }
    };

    match reconciliation::reconcile_from_webhook(&state, &event).await {
        Ok(booking) => Json(PaymentState::from(&booking)).into_response(),
        Err(e) => {
            tracing::error!(
                merchant_order_id = %event.payload.merchant_order_id,
                error = %e,
                "webhook reconciliation failed"
            );
            e.into_response()
        }
    }
}
