//! Payment processor seam
//!
//! Billing only creates hosted checkout sessions and reads them back.
//! - [`StripeClient`]: Stripe Checkout Sessions API
//! - [`MemoryPayments`]: in-process processor for dev mode and tests

pub mod memory;
pub mod stripe;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::Result;

pub use memory::MemoryPayments;
pub use stripe::StripeClient;

/// Metadata key holding the purchasing user
pub const META_USER_ID: &str = "userId";
/// Metadata key holding the purchase kind
pub const META_TYPE: &str = "type";
/// Metadata key holding the credited amount
pub const META_AMOUNT_USD: &str = "amount_usd";
/// Only purchase kind billing creates
pub const CREDIT_PURCHASE: &str = "credit_purchase";

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub amount_usd: Decimal,
    pub description: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    /// Hosted page the user is redirected to
    pub url: Option<String>,
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSession {
    pub fn metadata_user(&self) -> Option<&str> {
        self.metadata.get(META_USER_ID).map(String::as_str)
    }
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession>;

    /// `Ok(None)` when the processor does not know the session
    async fn retrieve_session(&self, session_id: &str) -> Result<Option<CheckoutSession>>;
}
