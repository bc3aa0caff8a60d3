//! In-process payment processor for dev mode and tests
//!
//! Sessions start unpaid; [`MemoryPayments::mark_paid`] simulates the user
//! finishing the hosted checkout. In dev mode sessions can be created
//! already paid so the verify flow works without a browser round trip.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::{CheckoutRequest, CheckoutSession, PaymentProcessor, PaymentStatus};
use crate::types::Result;

#[derive(Default)]
pub struct MemoryPayments {
    sessions: DashMap<String, CheckoutSession>,
    auto_pay: bool,
}

impl MemoryPayments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every created session is immediately marked paid
    pub fn auto_paying() -> Self {
        Self {
            sessions: DashMap::new(),
            auto_pay: true,
        }
    }

    pub fn mark_paid(&self, session_id: &str) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut session) => {
                session.payment_status = PaymentStatus::Paid;
                true
            }
            None => false,
        }
    }

    /// Insert a session directly, e.g. one with tampered metadata
    pub fn insert(&self, session: CheckoutSession) {
        self.sessions.insert(session.id.clone(), session);
    }
}

#[async_trait]
impl PaymentProcessor for MemoryPayments {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let id = format!("cs_test_{}", Uuid::new_v4().simple());
        let session = CheckoutSession {
            url: Some(format!("https://checkout.invalid/pay/{id}")),
            id: id.clone(),
            payment_status: if self.auto_pay {
                PaymentStatus::Paid
            } else {
                PaymentStatus::Unpaid
            },
            metadata: request.metadata.clone(),
        };
        self.sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<Option<CheckoutSession>> {
        Ok(self.sessions.get(session_id).map(|s| s.clone()))
    }
}
