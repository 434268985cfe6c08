use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::db::{queries, StoreError};
use crate::errors::AppError;
use crate::models::{Booking, BookingStatus, PaymentOutcome, PaymentStatus};
use crate::services::booking::{load_booking, MAX_WRITE_ATTEMPTS};
use crate::services::gateway::OrderState;
use crate::state::AppState;

/// Callback codes that always mean the payment did not go through.
pub const FAILURE_CODES: &[&str] = &[
    "PAYMENT_ERROR",
    "PAYMENT_FAILED",
    "PAYMENT_DECLINED",
    "PAYMENT_CANCELLED",
    "FAILED",
    "TIMED_OUT",
    "AUTHORIZATION_FAILED",
    "USER_CANCELLED",
];

/// Codes accepted as success under the strict policy.
pub const SUCCESS_CODES: &[&str] = &["PAYMENT_SUCCESS", "SUCCESS", "COMPLETED"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackPolicy {
    /// Anything that is not a known failure counts as success.
    Permissive,
    /// Only allow-listed codes confirm; unknown codes stay pending.
    Strict,
}

impl CallbackPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        if config.strict_callback_codes {
            CallbackPolicy::Strict
        } else {
            CallbackPolicy::Permissive
        }
    }
}

pub fn classify_callback_code(code: &str, policy: CallbackPolicy) -> PaymentOutcome {
    let code = code.trim().to_ascii_uppercase();
    if FAILURE_CODES.contains(&code.as_str()) {
        return PaymentOutcome::Failed;
    }
    match policy {
        CallbackPolicy::Permissive => PaymentOutcome::Paid,
        CallbackPolicy::Strict if SUCCESS_CODES.contains(&code.as_str()) => PaymentOutcome::Paid,
        CallbackPolicy::Strict => PaymentOutcome::Pending,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentState {
    pub success: bool,
    pub booking_id: String,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
}

impl From<&Booking> for PaymentState {
    fn from(booking: &Booking) -> Self {
        Self {
            success: true,
            booking_id: booking.id.clone(),
            status: booking.status,
            payment_status: booking.payment_status,
        }
    }
}

/// Server-to-server notification body.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub event: String,
    pub payload: WebhookOrder,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookOrder {
    pub merchant_order_id: String,
    pub state: String,
}

/// Writes `outcome` unless the booking is already settled. A concurrent
/// writer makes us re-read and try again; a settled re-read ends the loop.
async fn commit_outcome(
    state: &AppState,
    mut booking: Booking,
    outcome: PaymentOutcome,
) -> Result<Booking, AppError> {
    for _ in 0..MAX_WRITE_ATTEMPTS {
        if !booking.apply_outcome(outcome) {
            return Ok(booking);
        }

        match queries::save_booking(state.store.as_ref(), &mut booking).await {
            Ok(()) => {
                tracing::info!(
                    booking_id = %booking.id,
                    status = booking.status.as_str(),
                    payment_status = booking.payment_status.as_str(),
                    "booking reconciled"
                );
                return Ok(booking);
            }
            Err(StoreError::Conflict { .. }) => {
                tracing::warn!(booking_id = %booking.id, "concurrent update, re-reading booking");
                let kind = booking.kind();
                let id = booking.id.clone();
                booking = queries::get_booking(state.store.as_ref(), kind, &id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("booking {id}")))?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(AppError::Conflict(format!("booking {} kept changing", booking.id)))
}

/// Gateway redirect/callback. Without a code the gateway is asked directly.
pub async fn reconcile_from_callback(
    state: &AppState,
    booking_id: &str,
    code: Option<&str>,
) -> Result<Booking, AppError> {
    let code = match code.map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => code,
        None => return check_payment_status(state, booking_id).await,
    };

    let booking = load_booking(state, booking_id).await?;
    let outcome = classify_callback_code(code, CallbackPolicy::from_config(&state.config));

    if outcome == PaymentOutcome::Pending {
        tracing::warn!(
            booking_id = %booking.id,
            code,
            "unrecognized callback code, leaving booking pending for review"
        );
    }

    tracing::info!(booking_id = %booking.id, code, "payment callback received");
    commit_outcome(state, booking, outcome).await
}

pub async fn check_payment_status(state: &AppState, booking_id: &str) -> Result<Booking, AppError> {
    let booking = load_booking(state, booking_id).await?;

    if booking.status.is_settled() {
        tracing::debug!(booking_id = %booking.id, status = booking.status.as_str(), "already settled");
        return Ok(booking);
    }

    let order = state
        .gateway
        .order_status(&booking.transaction_id)
        .await
        .map_err(|e| AppError::GatewayCommunication(format!("{e:#}")))?;

    tracing::debug!(booking_id = %booking.id, order = ?order, "gateway order status");
    commit_outcome(state, booking, order.outcome()).await
}

pub async fn reconcile_from_webhook(state: &AppState, event: &WebhookEvent) -> Result<Booking, AppError> {
    let transaction_id = event.payload.merchant_order_id.as_str();
    let booking = queries::find_booking_by_transaction_id(state.store.as_ref(), transaction_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("transaction {transaction_id}")))?;

    let order = OrderState::parse(&event.payload.state);
    tracing::info!(
        booking_id = %booking.id,
        event = %event.event,
        order = ?order,
        "payment webhook received"
    );
    commit_outcome(state, booking, order.outcome()).await
}
