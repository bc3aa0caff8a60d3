//! All-or-nothing suspension
//!
//! A user over their entitlement in any dimension has every server
//! suspended; otherwise every server is unsuspended. Per-server panel
//! failures are logged and counted and never stop the pass.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::panel::PanelClient;
use crate::services::entitlement::EntitlementCalculator;
use crate::types::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    /// Whether the user's servers should be suspended
    pub suspend: bool,
    pub exceeded: Vec<&'static str>,
    pub servers: usize,
    /// Servers whose flag was flipped
    pub changed: usize,
    pub failed: usize,
}

pub struct SuspensionReconciler {
    entitlement: Arc<EntitlementCalculator>,
    panel: Arc<dyn PanelClient>,
}

impl SuspensionReconciler {
    pub fn new(entitlement: Arc<EntitlementCalculator>, panel: Arc<dyn PanelClient>) -> Self {
        Self { entitlement, panel }
    }

    pub async fn reconcile(&self, user_id: &str) -> Result<ReconcileOutcome> {
        let (entitlement, servers) = self.entitlement.for_user(user_id).await?;
        let exceeded = entitlement.exceeded();
        let suspend = !exceeded.is_empty();

        let mut outcome = ReconcileOutcome {
            suspend,
            exceeded,
            servers: servers.len(),
            ..Default::default()
        };

        for server in servers.iter().filter(|s| s.suspended != suspend) {
            let result = if suspend {
                self.panel.suspend_server(&server.id).await
            } else {
                self.panel.unsuspend_server(&server.id).await
            };
            match result {
                Ok(()) => outcome.changed += 1,
                Err(err) => {
                    outcome.failed += 1;
                    warn!(
                        user_id = %user_id,
                        server_id = %server.id,
                        suspend,
                        error = %err,
                        "Failed to update server suspension"
                    );
                }
            }
        }

        if outcome.changed > 0 {
            info!(
                user_id = %user_id,
                suspend,
                exceeded = ?outcome.exceeded,
                changed = outcome.changed,
                "Reconciled server suspension"
            );
        }
        Ok(outcome)
    }

    /// Reconcile after a mutation that already committed; failures only log
    pub async fn reconcile_after_change(&self, user_id: &str) -> Option<ReconcileOutcome> {
        match self.reconcile(user_id).await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "Suspension reconcile failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResourceGrant, ServerLimits};
    use crate::services::testing::harness;

    #[tokio::test]
    async fn test_over_limit_suspends_all_servers() {
        let h = harness();
        // Default package: 3072 MB RAM, 2 servers
        h.panel.add_server("s1", "u1", ServerLimits::new(2048, 1024, 50));
        h.panel.add_server("s2", "u1", ServerLimits::new(2048, 1024, 50));

        let outcome = h.economy.reconciler.reconcile("u1").await.unwrap();
        assert!(outcome.suspend);
        assert_eq!(outcome.exceeded, vec!["ram"]);
        assert!(h.panel.server("s1").unwrap().suspended);
        assert!(h.panel.server("s2").unwrap().suspended);

        // Granting more RAM lifts it
        h.economy
            .admin
            .set_resources("u1", ResourceGrant::new(1024, 0, 0, 0))
            .await
            .unwrap();
        assert!(!h.panel.server("s1").unwrap().suspended);
        assert!(!h.panel.server("s2").unwrap().suspended);
    }

    #[tokio::test]
    async fn test_failing_server_does_not_stop_pass() {
        let h = harness();
        h.panel.add_server("s1", "u1", ServerLimits::new(4096, 1024, 50));
        h.panel.add_server("s2", "u1", ServerLimits::new(1024, 1024, 50));
        h.panel.fail_server("s1");

        // Listing still works; only the per-server call for s1 fails
        let outcome = h.economy.reconciler.reconcile("u1").await.unwrap();
        assert!(outcome.suspend);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.changed, 1);
        assert!(h.panel.server("s2").unwrap().suspended);
    }

    #[tokio::test]
    async fn test_within_limits_is_noop() {
        let h = harness();
        h.panel.add_server("s1", "u1", ServerLimits::new(1024, 1024, 50));
        let outcome = h.economy.reconciler.reconcile("u1").await.unwrap();
        assert!(!outcome.suspend);
        assert_eq!(outcome.changed, 0);
    }
}
