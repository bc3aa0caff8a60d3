//! Admin edits to balances, grants and packages
//!
//! Callers must have checked the admin claim. Grant and package edits can
//! shrink an entitlement, so both end with a reconcile.

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::config::EconomyConfig;
use crate::models::ResourceGrant;
use crate::services::ledger::LedgerService;
use crate::services::suspension::{ReconcileOutcome, SuspensionReconciler};
use crate::store::Table;
use crate::types::{EconomyError, Result};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminChange {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<ReconcileOutcome>,
}

pub struct AdminService {
    config: Arc<EconomyConfig>,
    ledger: Arc<LedgerService>,
    extras: Table<ResourceGrant>,
    packages: Table<String>,
    reconciler: Arc<SuspensionReconciler>,
}

impl AdminService {
    pub fn new(
        config: Arc<EconomyConfig>,
        ledger: Arc<LedgerService>,
        extras: Table<ResourceGrant>,
        packages: Table<String>,
        reconciler: Arc<SuspensionReconciler>,
    ) -> Self {
        Self {
            config,
            ledger,
            extras,
            packages,
            reconciler,
        }
    }

    pub async fn set_coins(&self, user_id: &str, amount: i64) -> Result<AdminChange> {
        self.ledger.set_balance(user_id, amount).await?;
        info!(user_id = %user_id, amount, "Admin set coin balance");
        Ok(AdminChange {
            user_id: user_id.to_string(),
            reconcile: None,
        })
    }

    /// Replace the user's extra grant
    pub async fn set_resources(&self, user_id: &str, grant: ResourceGrant) -> Result<AdminChange> {
        if !grant.is_non_negative() {
            return Err(EconomyError::Validation(
                "Resources cannot be negative".to_string(),
            ));
        }
        // Same key lock as store and bundle purchases
        self.extras
            .update_opt(user_id, |slot| {
                *slot = (grant != ResourceGrant::default()).then_some(grant);
                Ok(())
            })
            .await?;
        info!(user_id = %user_id, grant = ?grant, "Admin set extra resources");

        Ok(AdminChange {
            user_id: user_id.to_string(),
            reconcile: self.reconciler.reconcile_after_change(user_id).await,
        })
    }

    pub async fn set_package(&self, user_id: &str, package: &str) -> Result<AdminChange> {
        if !self.config.packages.contains_key(package) {
            return Err(EconomyError::Validation(format!("Unknown package: {package}")));
        }
        self.packages.put(user_id, &package.to_string()).await?;
        info!(user_id = %user_id, package = %package, "Admin set package");

        Ok(AdminChange {
            user_id: user_id.to_string(),
            reconcile: self.reconciler.reconcile_after_change(user_id).await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServerLimits;
    use crate::services::testing::harness;
    use tokio_test::assert_err;

    #[tokio::test]
    async fn test_set_coins() {
        let h = harness();
        h.economy.admin.set_coins("u1", 1234).await.unwrap();
        assert_eq!(h.economy.ledger.balance("u1").await.unwrap(), 1234);
        assert_err!(h.economy.admin.set_coins("u1", -1).await);
    }

    #[tokio::test]
    async fn test_shrinking_grant_suspends() {
        let h = harness();
        h.panel.add_server("s1", "u1", ServerLimits::new(4096, 1024, 50));
        let change = h
            .economy
            .admin
            .set_resources("u1", ResourceGrant::new(1024, 0, 0, 0))
            .await
            .unwrap();
        assert!(change.reconcile.is_some_and(|r| !r.suspend));

        let change = h
            .economy
            .admin
            .set_resources("u1", ResourceGrant::default())
            .await
            .unwrap();
        assert!(change.reconcile.is_some_and(|r| r.suspend));
        assert!(h.panel.server("s1").unwrap().suspended);
    }

    #[tokio::test]
    async fn test_set_resources_waits_for_key_lock() {
        use crate::services::entitlement::{EXTRA_TABLE, PACKAGE_TABLE};
        use crate::store::{KeyLocks, KeyValueStore, Table};
        use std::time::Duration;

        let h = harness();
        let locks = Arc::new(KeyLocks::new());
        let store = Arc::clone(&h.store) as Arc<dyn KeyValueStore>;
        let admin = Arc::new(AdminService::new(
            Arc::new(EconomyConfig::default()),
            Arc::clone(&h.economy.ledger),
            Table::new(EXTRA_TABLE, Arc::clone(&store), Arc::clone(&locks)),
            Table::new(PACKAGE_TABLE, store, Arc::clone(&locks)),
            Arc::clone(&h.economy.reconciler),
        ));

        // A purchase is mid read-modify-write on the same key
        let guard = locks.lock(format!("{EXTRA_TABLE}:u1")).await;
        let task = {
            let admin = Arc::clone(&admin);
            tokio::spawn(async move { admin.set_resources("u1", ResourceGrant::new(512, 0, 0, 0)).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!h.store.contains(EXTRA_TABLE, "u1"));

        drop(guard);
        task.await.unwrap().unwrap();
        assert_eq!(
            h.economy.entitlement.extra("u1").await.unwrap(),
            ResourceGrant::new(512, 0, 0, 0)
        );
    }

    #[tokio::test]
    async fn test_unknown_package_rejected() {
        let h = harness();
        let err = assert_err!(h.economy.admin.set_package("u1", "enterprise").await);
        assert!(matches!(err, EconomyError::Validation(_)));
        h.economy.admin.set_package("u1", "default").await.unwrap();
    }
}
