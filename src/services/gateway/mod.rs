pub mod phonepe;

use async_trait::async_trait;

use crate::models::PaymentOutcome;

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    /// Our booking's transaction id.
    pub merchant_order_id: String,
    /// Amount in paise.
    pub amount_minor: i64,
    pub redirect_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    Completed,
    Failed,
    Pending,
}

impl OrderState {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "COMPLETED" => OrderState::Completed,
            "FAILED" => OrderState::Failed,
            _ => OrderState::Pending,
        }
    }

    pub fn outcome(&self) -> PaymentOutcome {
        match self {
            OrderState::Completed => PaymentOutcome::Paid,
            OrderState::Failed => PaymentOutcome::Failed,
            OrderState::Pending => PaymentOutcome::Pending,
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Returns the hosted checkout URL, or `None` when the gateway answered
    /// without one. `Err` means the gateway could not be reached.
    async fn create_checkout(&self, request: &CheckoutRequest) -> anyhow::Result<Option<String>>;

    async fn order_status(&self, merchant_order_id: &str) -> anyhow::Result<OrderState>;
}

pub fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}
