//! Payment-backed account credit
//!
//! Real money only ever enters through a hosted checkout session. A paid
//! session becomes decimal `credit`, which is then spent on coin packages
//! or resource bundles from the static catalog. A session id is applied at
//! most once: it is marked processed before the credit is written, so a
//! crash in between leaves it used rather than creditable twice.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::catalog::{Bundle, CoinPackage, BUNDLES, COIN_PURCHASE_OPTIONS};
use crate::clock::Clock;
use crate::models::ResourceGrant;
use crate::payments::{
    CheckoutRequest, CheckoutSession, PaymentProcessor, PaymentStatus, CREDIT_PURCHASE,
    META_AMOUNT_USD, META_TYPE, META_USER_ID,
};
use crate::services::ledger::LedgerService;
use crate::services::suspension::{ReconcileOutcome, SuspensionReconciler};
use crate::store::{KeyLocks, Table};
use crate::types::{EconomyError, Result};

pub const CREDIT_TABLE: &str = "credit";
pub const TRANSACTIONS_TABLE: &str = "transactions";
pub const PROCESSED_SESSIONS_TABLE: &str = "processed-sessions";

const TRANSACTIONS_CAP: usize = 100;
const INFO_TRANSACTIONS: usize = 20;

/// Smallest and largest checkout, in USD
pub const MIN_CHECKOUT_USD: Decimal = Decimal::from_parts(100, 0, 0, false, 2);
pub const MAX_CHECKOUT_USD: Decimal = Decimal::from_parts(50000, 0, 0, false, 2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    CreditPurchase,
    CoinPurchase,
    BundlePurchase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub details: String,
    /// Credit movement in USD: positive when added, negative when spent
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedCheckout {
    pub session_id: String,
    pub amount_usd: Decimal,
    pub credit: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinPurchase {
    pub package_id: &'static str,
    pub coins: i64,
    pub balance: i64,
    pub credit: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundlePurchase {
    pub bundle_id: &'static str,
    pub coins: i64,
    pub resources: ResourceGrant,
    pub credit: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<ReconcileOutcome>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingInfo {
    pub credit: Decimal,
    pub transactions: Vec<Transaction>,
    pub coin_packages: Vec<CatalogEntry>,
    pub bundles: Vec<CatalogEntry>,
}

/// Catalog item with its USD price
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: &'static str,
    pub name: Option<&'static str>,
    pub price_usd: Decimal,
    pub coins: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceGrant>,
}

impl From<&'static CoinPackage> for CatalogEntry {
    fn from(p: &'static CoinPackage) -> Self {
        Self {
            id: p.id,
            name: None,
            price_usd: p.price_usd(),
            coins: p.coins,
            resources: None,
        }
    }
}

impl From<&'static Bundle> for CatalogEntry {
    fn from(b: &'static Bundle) -> Self {
        Self {
            id: b.id,
            name: Some(b.name),
            price_usd: b.price_usd(),
            coins: b.coins,
            resources: Some(b.resources),
        }
    }
}

pub struct BillingService {
    payments: Arc<dyn PaymentProcessor>,
    ledger: Arc<LedgerService>,
    reconciler: Arc<SuspensionReconciler>,
    credit: Table<Decimal>,
    transactions: Table<Vec<Transaction>>,
    processed: Table<bool>,
    extras: Table<ResourceGrant>,
    locks: Arc<KeyLocks>,
    clock: Arc<dyn Clock>,
}

impl BillingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        payments: Arc<dyn PaymentProcessor>,
        ledger: Arc<LedgerService>,
        reconciler: Arc<SuspensionReconciler>,
        credit: Table<Decimal>,
        transactions: Table<Vec<Transaction>>,
        processed: Table<bool>,
        extras: Table<ResourceGrant>,
        locks: Arc<KeyLocks>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            payments,
            ledger,
            reconciler,
            credit,
            transactions,
            processed,
            extras,
            locks,
            clock,
        }
    }

    pub async fn credit_balance(&self, user_id: &str) -> Result<Decimal> {
        Ok(self.credit.get(user_id).await?.unwrap_or(Decimal::ZERO))
    }

    pub async fn create_checkout(&self, user_id: &str, amount_usd: Decimal) -> Result<CheckoutSession> {
        if amount_usd < MIN_CHECKOUT_USD || amount_usd > MAX_CHECKOUT_USD {
            return Err(EconomyError::Validation(format!(
                "Amount must be between ${MIN_CHECKOUT_USD} and ${MAX_CHECKOUT_USD}"
            )));
        }
        if amount_usd.round_dp(2) != amount_usd {
            return Err(EconomyError::Validation(
                "Amount cannot have more than two decimal places".to_string(),
            ));
        }

        let metadata = HashMap::from([
            (META_USER_ID.to_string(), user_id.to_string()),
            (META_TYPE.to_string(), CREDIT_PURCHASE.to_string()),
            (META_AMOUNT_USD.to_string(), amount_usd.to_string()),
        ]);
        let session = self
            .payments
            .create_checkout_session(&CheckoutRequest {
                amount_usd,
                description: format!("${amount_usd} account credit"),
                metadata,
            })
            .await?;

        info!(user_id = %user_id, session_id = %session.id, amount_usd = %amount_usd, "Checkout session created");
        Ok(session)
    }

    /// Apply a paid session to the caller's credit, exactly once
    pub async fn verify_checkout(&self, session_id: &str, user_id: &str) -> Result<VerifiedCheckout> {
        let _scope = self.locks.lock(format!("checkout:{session_id}")).await;

        if self.processed.get(session_id).await?.unwrap_or(false) {
            return Err(EconomyError::SessionAlreadyProcessed(session_id.to_string()));
        }

        let session = self
            .payments
            .retrieve_session(session_id)
            .await?
            .ok_or_else(|| EconomyError::Validation(format!("Unknown checkout session: {session_id}")))?;

        if session.payment_status != PaymentStatus::Paid {
            return Err(EconomyError::PaymentIncomplete(session_id.to_string()));
        }
        if session.metadata_user() != Some(user_id) {
            warn!(user_id = %user_id, session_id = %session_id, "Checkout session verified by another user");
            return Err(EconomyError::Unauthorized(
                "Checkout session belongs to another user".to_string(),
            ));
        }
        if session.metadata.get(META_TYPE).map(String::as_str) != Some(CREDIT_PURCHASE) {
            return Err(EconomyError::Validation("Unsupported checkout session type".to_string()));
        }
        let amount_usd = session
            .metadata
            .get(META_AMOUNT_USD)
            .and_then(|raw| Decimal::from_str(raw).ok())
            .filter(|amount| *amount > Decimal::ZERO)
            .ok_or_else(|| EconomyError::Validation("Checkout session has no valid amount".to_string()))?;

        self.processed.put(session_id, &true).await?;

        let credit = self
            .credit
            .update(user_id, |balance| {
                *balance += amount_usd;
                Ok(*balance)
            })
            .await?;

        self.record(
            user_id,
            TransactionKind::CreditPurchase,
            format!("Checkout {session_id}"),
            amount_usd,
        )
        .await;
        info!(user_id = %user_id, session_id = %session_id, amount_usd = %amount_usd, "Checkout credited");

        Ok(VerifiedCheckout {
            session_id: session_id.to_string(),
            amount_usd,
            credit,
        })
    }

    pub async fn purchase_coins(&self, user_id: &str, package_id: &str) -> Result<CoinPurchase> {
        let package = CoinPackage::find(package_id)?;
        let price = package.price_usd();
        let credit = self.spend_credit(user_id, price).await?;

        let balance = match self.ledger.credit(user_id, package.coins).await {
            Ok(balance) => balance,
            Err(err) => {
                self.restore_credit(user_id, price).await;
                return Err(err);
            }
        };

        self.record(
            user_id,
            TransactionKind::CoinPurchase,
            format!("{} coins ({})", package.coins, package.id),
            -price,
        )
        .await;
        info!(user_id = %user_id, package = package.id, coins = package.coins, "Coins purchased with credit");

        Ok(CoinPurchase {
            package_id: package.id,
            coins: package.coins,
            balance,
            credit,
        })
    }

    pub async fn purchase_bundle(&self, user_id: &str, bundle_id: &str) -> Result<BundlePurchase> {
        let bundle = Bundle::find(bundle_id)?;
        let price = bundle.price_usd();
        let credit = self.spend_credit(user_id, price).await?;

        if let Err(err) = self
            .extras
            .update(user_id, |extra| {
                *extra += bundle.resources;
                Ok(())
            })
            .await
        {
            self.restore_credit(user_id, price).await;
            return Err(err);
        }
        if let Err(err) = self.ledger.credit(user_id, bundle.coins).await {
            error!(user_id = %user_id, bundle = bundle.id, error = %err, "Bundle coin grant failed, rolling back");
            let revoked = self
                .extras
                .update(user_id, |extra| {
                    *extra -= bundle.resources;
                    Ok(())
                })
                .await;
            if let Err(revoke_err) = revoked {
                error!(user_id = %user_id, bundle = bundle.id, error = %revoke_err, "Failed to revoke bundle resources");
            }
            self.restore_credit(user_id, price).await;
            return Err(err);
        }

        self.record(
            user_id,
            TransactionKind::BundlePurchase,
            format!("{} ({})", bundle.name, bundle.id),
            -price,
        )
        .await;
        info!(user_id = %user_id, bundle = bundle.id, "Bundle purchased with credit");

        let reconcile = self.reconciler.reconcile_after_change(user_id).await;
        Ok(BundlePurchase {
            bundle_id: bundle.id,
            coins: bundle.coins,
            resources: bundle.resources,
            credit,
            reconcile,
        })
    }

    pub async fn info(&self, user_id: &str) -> Result<BillingInfo> {
        Ok(BillingInfo {
            credit: self.credit_balance(user_id).await?,
            transactions: self.transactions(user_id, INFO_TRANSACTIONS).await?,
            coin_packages: COIN_PURCHASE_OPTIONS.iter().map(CatalogEntry::from).collect(),
            bundles: BUNDLES.iter().map(CatalogEntry::from).collect(),
        })
    }

    pub async fn transactions(&self, user_id: &str, limit: usize) -> Result<Vec<Transaction>> {
        let mut entries = self.transactions.get_or_default(user_id).await?;
        entries.truncate(limit);
        Ok(entries)
    }

    async fn spend_credit(&self, user_id: &str, price: Decimal) -> Result<Decimal> {
        self.credit
            .update_opt(user_id, |slot| {
                let available = slot.unwrap_or(Decimal::ZERO);
                if available < price {
                    return Err(EconomyError::InsufficientCredit {
                        required: price,
                        available,
                    });
                }
                let next = available - price;
                *slot = Some(next);
                Ok(next)
            })
            .await
    }

    async fn restore_credit(&self, user_id: &str, amount: Decimal) {
        let restored = self
            .credit
            .update(user_id, |balance| {
                *balance += amount;
                Ok(())
            })
            .await;
        if let Err(err) = restored {
            error!(user_id = %user_id, amount = %amount, error = %err, "Failed to restore credit");
        }
    }

    async fn record(&self, user_id: &str, kind: TransactionKind, details: String, amount: Decimal) {
        let entry = Transaction {
            id: Uuid::new_v4().to_string(),
            kind,
            details,
            amount,
            timestamp: self.clock.now(),
        };
        if let Err(err) = self
            .transactions
            .push_capped(user_id, entry, TRANSACTIONS_CAP)
            .await
        {
            warn!(user_id = %user_id, error = %err, "Failed to record transaction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServerLimits;
    use crate::services::testing::{flaky_harness, harness};
    use rust_decimal_macros::dec;
    use tokio_test::assert_err;

    #[tokio::test]
    async fn test_checkout_amount_bounds() {
        let h = harness();
        for bad in [dec!(0.99), dec!(500.01), dec!(-5), dec!(10.001)] {
            let err = assert_err!(h.economy.billing.create_checkout("u1", bad).await);
            assert!(matches!(err, EconomyError::Validation(_)));
        }
        let session = h.economy.billing.create_checkout("u1", dec!(500)).await.unwrap();
        assert_eq!(session.metadata_user(), Some("u1"));
        assert_eq!(session.metadata[META_AMOUNT_USD], "500");
    }

    #[tokio::test]
    async fn test_verify_credits_exactly_once() {
        let h = harness();
        let session = h.economy.billing.create_checkout("u1", dec!(10.50)).await.unwrap();

        let err = assert_err!(h.economy.billing.verify_checkout(&session.id, "u1").await);
        assert!(matches!(err, EconomyError::PaymentIncomplete(_)));

        h.payments.mark_paid(&session.id);
        let err = assert_err!(h.economy.billing.verify_checkout(&session.id, "u2").await);
        assert!(matches!(err, EconomyError::Unauthorized(_)));

        let verified = h.economy.billing.verify_checkout(&session.id, "u1").await.unwrap();
        assert_eq!(verified.credit, dec!(10.50));

        let err = assert_err!(h.economy.billing.verify_checkout(&session.id, "u1").await);
        assert!(matches!(err, EconomyError::SessionAlreadyProcessed(_)));
        assert_eq!(h.economy.billing.credit_balance("u1").await.unwrap(), dec!(10.50));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_verifications_credit_once() {
        let h = harness();
        let session = h.economy.billing.create_checkout("u1", dec!(25)).await.unwrap();
        h.payments.mark_paid(&session.id);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let billing = Arc::clone(&h.economy.billing);
            let id = session.id.clone();
            handles.push(tokio::spawn(async move { billing.verify_checkout(&id, "u1").await }));
        }
        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(h.economy.billing.credit_balance("u1").await.unwrap(), dec!(25));
    }

    #[tokio::test]
    async fn test_tampered_session_is_rejected() {
        let h = harness();
        h.payments.insert(CheckoutSession {
            id: "cs_forged".to_string(),
            url: None,
            payment_status: PaymentStatus::Paid,
            metadata: HashMap::from([(META_USER_ID.to_string(), "u1".to_string())]),
        });
        let err = assert_err!(h.economy.billing.verify_checkout("cs_forged", "u1").await);
        assert!(matches!(err, EconomyError::Validation(_)));
        assert_eq!(h.economy.billing.credit_balance("u1").await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_purchase_coins_spends_credit() {
        let h = harness();
        let session = h.economy.billing.create_checkout("u1", dec!(10)).await.unwrap();
        h.payments.mark_paid(&session.id);
        h.economy.billing.verify_checkout(&session.id, "u1").await.unwrap();

        let purchase = h.economy.billing.purchase_coins("u1", "coins_5000").await.unwrap();
        assert_eq!(purchase.balance, 5000);
        assert_eq!(purchase.credit, dec!(2));

        h.economy.billing.purchase_coins("u1", "coins_1000").await.unwrap();
        let err = assert_err!(h.economy.billing.purchase_coins("u1", "coins_5000").await);
        assert!(matches!(err, EconomyError::InsufficientCredit { .. }));
        assert_eq!(h.economy.ledger.balance("u1").await.unwrap(), 6000);
        assert_eq!(h.economy.billing.credit_balance("u1").await.unwrap(), dec!(0));

        let err = assert_err!(h.economy.billing.purchase_coins("u1", "coins_7").await);
        assert!(matches!(err, EconomyError::Validation(_)));
    }

    #[tokio::test]
    async fn test_bundle_grants_resources_and_reconciles() {
        let h = harness();
        // Over the default 2-server package until the bundle lands
        for id in ["s1", "s2", "s3"] {
            h.panel.add_server(id, "u1", ServerLimits::new(512, 1024, 25));
        }
        h.economy.reconciler.reconcile("u1").await.unwrap();
        assert!(h.panel.server("s1").unwrap().suspended);

        let session = h.economy.billing.create_checkout("u1", dec!(5)).await.unwrap();
        h.payments.mark_paid(&session.id);
        h.economy.billing.verify_checkout(&session.id, "u1").await.unwrap();

        let purchase = h.economy.billing.purchase_bundle("u1", "starter").await.unwrap();
        assert_eq!(purchase.credit, Decimal::ZERO);
        assert_eq!(h.economy.ledger.balance("u1").await.unwrap(), 1000);
        assert!(!h.panel.server("s1").unwrap().suspended);

        let info = h.economy.billing.info("u1").await.unwrap();
        assert_eq!(info.transactions.len(), 2);
        assert_eq!(info.transactions[0].kind, TransactionKind::BundlePurchase);
        assert_eq!(info.bundles.len(), 3);
    }

    #[tokio::test]
    async fn test_bundle_coin_failure_rolls_back_grant_and_credit() {
        let h = flaky_harness();
        let session = h.economy.billing.create_checkout("u1", dec!(20)).await.unwrap();
        h.payments.mark_paid(&session.id);
        h.economy.billing.verify_checkout(&session.id, "u1").await.unwrap();

        h.store.fail_writes(crate::services::ledger::COINS_TABLE);
        let err = assert_err!(h.economy.billing.purchase_bundle("u1", "pro").await);
        assert!(matches!(err, EconomyError::Store(_)));

        assert_eq!(h.economy.billing.credit_balance("u1").await.unwrap(), dec!(20));
        assert_eq!(
            h.economy.entitlement.extra("u1").await.unwrap(),
            ResourceGrant::default()
        );
    }
}
