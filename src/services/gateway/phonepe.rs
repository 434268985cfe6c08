use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;

use super::{CheckoutRequest, OrderState, PaymentGateway};
use crate::config::GatewayEnv;

/// Refresh the OAuth token this many seconds before it expires.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
/// Checkout links stay valid for 20 minutes.
const CHECKOUT_EXPIRY_SECS: i64 = 1200;

struct CachedToken {
    access_token: String,
    expires_at: i64,
}

pub struct PhonePeGateway {
    client_id: String,
    client_secret: String,
    client_version: String,
    env: GatewayEnv,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl PhonePeGateway {
    pub fn new(
        client_id: String,
        client_secret: String,
        client_version: String,
        env: GatewayEnv,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            client_version,
            env,
            client: reqwest::Client::new(),
            token: Mutex::new(None),
        }
    }

    fn auth_url(&self) -> &'static str {
        match self.env {
            GatewayEnv::Production => "https://api.phonepe.com/apis/identity-manager/v1/oauth/token",
            GatewayEnv::Sandbox => "https://api-preprod.phonepe.com/apis/pg-sandbox/v1/oauth/token",
        }
    }

    fn api_base(&self) -> &'static str {
        match self.env {
            GatewayEnv::Production => "https://api.phonepe.com/apis/pg",
            GatewayEnv::Sandbox => "https://api-preprod.phonepe.com/apis/pg-sandbox",
        }
    }

    async fn access_token(&self) -> anyhow::Result<String> {
        let mut cached = self.token.lock().await;
        let now = Utc::now().timestamp();

        if let Some(token) = cached.as_ref() {
            if token.expires_at - TOKEN_REFRESH_MARGIN_SECS > now {
                return Ok(token.access_token.clone());
            }
        }

        let resp = self
            .client
            .post(self.auth_url())
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_version", self.client_version.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .context("failed to call PhonePe auth API")?;

        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse PhonePe auth response")?;

        if !status.is_success() {
            anyhow::bail!("PhonePe auth error ({}): {}", status, data);
        }

        let access_token = data["access_token"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("missing access_token in PhonePe auth response"))?;
        let expires_at = data["expires_at"].as_i64().unwrap_or(now + 3600);

        tracing::debug!(expires_at, "refreshed PhonePe access token");
        *cached = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at,
        });

        Ok(access_token)
    }
}

fn checkout_body(request: &CheckoutRequest) -> serde_json::Value {
    json!({
        "merchantOrderId": request.merchant_order_id,
        "amount": request.amount_minor,
        "expireAfter": CHECKOUT_EXPIRY_SECS,
        "paymentFlow": {
            "type": "PG_CHECKOUT",
            "message": format!("Payment for booking {}", request.merchant_order_id),
            "merchantUrls": {
                "redirectUrl": request.redirect_url,
            },
        },
    })
}

fn checkout_url(data: &serde_json::Value) -> Option<String> {
    data["redirectUrl"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[async_trait]
impl PaymentGateway for PhonePeGateway {
    async fn create_checkout(&self, request: &CheckoutRequest) -> anyhow::Result<Option<String>> {
        let token = self.access_token().await?;

        let resp = self
            .client
            .post(format!("{}/checkout/v2/pay", self.api_base()))
            .header("Authorization", format!("O-Bearer {token}"))
            .json(&checkout_body(request))
            .send()
            .await
            .context("failed to call PhonePe pay API")?;

        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse PhonePe pay response")?;

        if !status.is_success() {
            tracing::warn!(
                merchant_order_id = %request.merchant_order_id,
                status = %status,
                response = %data,
                "PhonePe rejected checkout"
            );
            return Ok(None);
        }

        Ok(checkout_url(&data))
    }

    async fn order_status(&self, merchant_order_id: &str) -> anyhow::Result<OrderState> {
        let token = self.access_token().await?;

        let resp = self
            .client
            .get(format!(
                "{}/checkout/v2/order/{}/status",
                self.api_base(),
                merchant_order_id
            ))
            .header("Authorization", format!("O-Bearer {token}"))
            .send()
            .await
            .context("failed to call PhonePe order status API")?;

        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse PhonePe order status response")?;

        if !status.is_success() {
            anyhow::bail!("PhonePe order status error ({}): {}", status, data);
        }

        Ok(OrderState::parse(data["state"].as_str().unwrap_or_default()))
    }
}
