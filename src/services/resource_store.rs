//! Single-resource store
//!
//! Coins buy fixed-size units of one resource at a time, added to the
//! user's `extra` grant. A purchase can lift a suspension, so it always
//! ends with a reconcile.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::catalog::ResourceKind;
use crate::config::{EconomyConfig, UnitPrice};
use crate::models::ResourceGrant;
use crate::services::ledger::{shortfall_as, LedgerService};
use crate::services::suspension::{ReconcileOutcome, SuspensionReconciler};
use crate::store::Table;
use crate::types::{EconomyError, Result};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorePurchase {
    pub resource: ResourceKind,
    pub units: i64,
    /// Resource added (MB, percent or servers)
    pub amount: i64,
    pub cost: i64,
    pub balance: i64,
    pub extra: ResourceGrant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<ReconcileOutcome>,
}

pub struct ResourceStore {
    config: Arc<EconomyConfig>,
    ledger: Arc<LedgerService>,
    extras: Table<ResourceGrant>,
    reconciler: Arc<SuspensionReconciler>,
}

impl ResourceStore {
    pub fn new(
        config: Arc<EconomyConfig>,
        ledger: Arc<LedgerService>,
        extras: Table<ResourceGrant>,
        reconciler: Arc<SuspensionReconciler>,
    ) -> Self {
        Self {
            config,
            ledger,
            extras,
            reconciler,
        }
    }

    pub fn price(&self, resource: ResourceKind) -> Result<UnitPrice> {
        self.config
            .store
            .get(&resource)
            .copied()
            .ok_or_else(|| EconomyError::Config(format!("No store price for {}", resource.as_str())))
    }

    pub async fn buy(&self, user_id: &str, resource: ResourceKind, units: i64) -> Result<StorePurchase> {
        let max = self.config.max_units_per_purchase;
        if !(1..=max).contains(&units) {
            return Err(EconomyError::Validation(format!(
                "Units must be between 1 and {max}"
            )));
        }

        let price = self.price(resource)?;
        let cost = price.cost * units;
        let amount = price.per * units;

        let balance = self
            .ledger
            .debit(user_id, cost)
            .await
            .map_err(|e| {
                shortfall_as(e, |required, available| EconomyError::InsufficientCoins {
                    required,
                    available,
                })
            })?;

        let extra = match self
            .extras
            .update(user_id, |extra| {
                *extra += resource.grant(amount);
                Ok(*extra)
            })
            .await
        {
            Ok(extra) => extra,
            Err(err) => {
                if let Err(refund_err) = self.ledger.credit(user_id, cost).await {
                    error!(user_id = %user_id, cost, error = %refund_err, "Store refund failed");
                }
                return Err(err);
            }
        };

        info!(
            user_id = %user_id,
            resource = resource.as_str(),
            units,
            amount,
            cost,
            "Resource purchased"
        );

        let reconcile = self.reconciler.reconcile_after_change(user_id).await;
        Ok(StorePurchase {
            resource,
            units,
            amount,
            cost,
            balance,
            extra,
            reconcile,
        })
    }
}
