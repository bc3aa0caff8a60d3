//! Stripe Checkout Sessions client

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{CheckoutRequest, CheckoutSession, PaymentProcessor, PaymentStatus};
use crate::types::{EconomyError, Result};

const STRIPE_API: &str = "https://api.stripe.com/v1";

pub struct StripeClient {
    secret_key: String,
    success_url: String,
    cancel_url: String,
    api_base: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct StripeSession {
    id: String,
    url: Option<String>,
    payment_status: PaymentStatus,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl From<StripeSession> for CheckoutSession {
    fn from(s: StripeSession) -> Self {
        Self {
            id: s.id,
            url: s.url,
            payment_status: s.payment_status,
            metadata: s.metadata,
        }
    }
}

impl StripeClient {
    pub fn new(
        secret_key: &str,
        success_url: &str,
        cancel_url: &str,
        request_timeout: Duration,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent("panel-economy/0.1")
            .build()
            .unwrap_or_default();

        Self {
            secret_key: secret_key.to_string(),
            success_url: success_url.to_string(),
            cancel_url: cancel_url.to_string(),
            api_base: STRIPE_API.to_string(),
            http_client,
        }
    }

    /// Point the client at a different API host (stripe-mock, proxies)
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn form_params(&self, request: &CheckoutRequest) -> Result<Vec<(String, String)>> {
        let cents = to_cents(request.amount_usd)?;
        let mut params = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), self.success_url.clone()),
            ("cancel_url".to_string(), self.cancel_url.clone()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("line_items[0][price_data][currency]".to_string(), "usd".to_string()),
            ("line_items[0][price_data][unit_amount]".to_string(), cents.to_string()),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                request.description.clone(),
            ),
        ];
        let mut keys: Vec<_> = request.metadata.keys().collect();
        keys.sort();
        for key in keys {
            params.push((format!("metadata[{key}]"), request.metadata[key].clone()));
        }
        Ok(params)
    }

    async fn parse(&self, response: reqwest::Response) -> Result<Option<CheckoutSession>> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Stripe request failed");
            return Err(EconomyError::Upstream(format!("payment processor returned {status}")));
        }
        Ok(Some(response.json::<StripeSession>().await?.into()))
    }
}

fn to_cents(amount_usd: Decimal) -> Result<i64> {
    (amount_usd * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| EconomyError::Validation(format!("Amount out of range: {amount_usd}")))
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let params = self.form_params(request)?;
        let response = self
            .http_client
            .post(format!("{}/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&params)
            .send()
            .await?;

        let session = self.parse(response).await?.ok_or_else(|| {
            EconomyError::Upstream("payment processor rejected the session".to_string())
        })?;
        debug!(session_id = %session.id, "Created checkout session");
        Ok(session)
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<Option<CheckoutSession>> {
        let response = self
            .http_client
            .get(format!(
                "{}/checkout/sessions/{}",
                self.api_base,
                urlencoding::encode(session_id)
            ))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        self.parse(response).await
    }
}
