//! Economy engines and their composition root
//!
//! [`Economy::new`] wires every engine over one store, one lock registry,
//! one panel client, one payment processor and one clock. Engines share
//! the ledger and the reconciler by `Arc`.

pub mod admin;
pub mod billing;
pub mod boosts;
pub mod daily_rewards;
pub mod entitlement;
pub mod ledger;
pub mod referrals;
pub mod resource_store;
pub mod staking;
pub mod suspension;
pub mod tickers;

use chrono::FixedOffset;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::EconomyConfig;
use crate::panel::PanelClient;
use crate::payments::PaymentProcessor;
use crate::store::{KeyLocks, KeyValueStore, Table};

pub use admin::AdminService;
pub use billing::BillingService;
pub use boosts::{ActiveBoostStore, BoostEngine};
pub use daily_rewards::DailyRewardsEngine;
pub use entitlement::{Entitlement, EntitlementCalculator};
pub use ledger::LedgerService;
pub use referrals::ReferralService;
pub use resource_store::ResourceStore;
pub use staking::StakingEngine;
pub use suspension::SuspensionReconciler;
pub use tickers::{EconomyTickers, TickerIntervals};

/// External collaborators the engines are built over
pub struct EconomyDeps {
    pub store: Arc<dyn KeyValueStore>,
    pub panel: Arc<dyn PanelClient>,
    pub payments: Arc<dyn PaymentProcessor>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<EconomyConfig>,
    /// UTC offset at which a daily-reward day starts
    pub day_offset: FixedOffset,
}

pub struct Economy {
    pub config: Arc<EconomyConfig>,
    pub ledger: Arc<LedgerService>,
    pub entitlement: Arc<EntitlementCalculator>,
    pub reconciler: Arc<SuspensionReconciler>,
    pub boosts: Arc<BoostEngine>,
    pub staking: Arc<StakingEngine>,
    pub daily: Arc<DailyRewardsEngine>,
    pub billing: Arc<BillingService>,
    pub referrals: Arc<ReferralService>,
    pub resource_store: Arc<ResourceStore>,
    pub admin: Arc<AdminService>,
}

impl Economy {
    pub fn new(deps: EconomyDeps) -> Self {
        let EconomyDeps {
            store,
            panel,
            payments,
            clock,
            config,
            day_offset,
        } = deps;
        let locks = Arc::new(KeyLocks::new());

        fn table<T>(name: &'static str, store: &Arc<dyn KeyValueStore>, locks: &Arc<KeyLocks>) -> Table<T>
        where
            T: serde::Serialize + serde::de::DeserializeOwned + Send,
        {
            Table::new(name, Arc::clone(store), Arc::clone(locks))
        }

        let ledger = Arc::new(LedgerService::new(table(ledger::COINS_TABLE, &store, &locks)));
        let extras = table(entitlement::EXTRA_TABLE, &store, &locks);
        let packages = table(entitlement::PACKAGE_TABLE, &store, &locks);
        let active_boosts = ActiveBoostStore::new(table(boosts::ACTIVE_BOOSTS_TABLE, &store, &locks));

        let entitlement = Arc::new(EntitlementCalculator::new(
            Arc::clone(&config),
            extras.clone(),
            packages.clone(),
            active_boosts.clone(),
            Arc::clone(&panel),
        ));
        let reconciler = Arc::new(SuspensionReconciler::new(
            Arc::clone(&entitlement),
            Arc::clone(&panel),
        ));

        let boosts = Arc::new(BoostEngine::new(
            Arc::clone(&ledger),
            Arc::clone(&panel),
            active_boosts,
            table(boosts::SCHEDULED_BOOSTS_TABLE, &store, &locks),
            table(boosts::BOOST_HISTORY_TABLE, &store, &locks),
            Arc::clone(&locks),
            Arc::clone(&clock),
        ));

        let staking = Arc::new(StakingEngine::new(
            Arc::clone(&ledger),
            table(staking::STAKES_TABLE, &store, &locks),
            table(staking::ACTIVE_STAKERS_TABLE, &store, &locks),
            table(staking::STAKING_HISTORY_TABLE, &store, &locks),
            Arc::clone(&locks),
            Arc::clone(&clock),
        ));

        let daily = Arc::new(DailyRewardsEngine::new(
            Arc::clone(&ledger),
            table(daily_rewards::DAILY_STREAKS_TABLE, &store, &locks),
            table(daily_rewards::DAILY_HISTORY_TABLE, &store, &locks),
            table(daily_rewards::DAILY_LEADERBOARD_TABLE, &store, &locks),
            Arc::clone(&locks),
            Arc::clone(&clock),
            day_offset,
        ));

        let billing = Arc::new(BillingService::new(
            payments,
            Arc::clone(&ledger),
            Arc::clone(&reconciler),
            table(billing::CREDIT_TABLE, &store, &locks),
            table(billing::TRANSACTIONS_TABLE, &store, &locks),
            table(billing::PROCESSED_SESSIONS_TABLE, &store, &locks),
            extras.clone(),
            Arc::clone(&locks),
            Arc::clone(&clock),
        ));

        let referrals = Arc::new(ReferralService::new(
            Arc::clone(&ledger),
            table(referrals::REFERRAL_CODES_TABLE, &store, &locks),
            table(referrals::REFERRAL_CLAIMS_TABLE, &store, &locks),
            Arc::clone(&locks),
            Arc::clone(&clock),
        ));

        let resource_store = Arc::new(ResourceStore::new(
            Arc::clone(&config),
            Arc::clone(&ledger),
            extras.clone(),
            Arc::clone(&reconciler),
        ));

        let admin = Arc::new(AdminService::new(
            Arc::clone(&config),
            Arc::clone(&ledger),
            extras,
            packages,
            Arc::clone(&reconciler),
        ));

        Self {
            config,
            ledger,
            entitlement,
            reconciler,
            boosts,
            staking,
            daily,
            billing,
            referrals,
            resource_store,
            admin,
        }
    }

    pub fn tickers(&self, intervals: TickerIntervals) -> EconomyTickers {
        EconomyTickers::new(Arc::clone(&self.boosts), Arc::clone(&self.staking), intervals)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::clock::ManualClock;
    use crate::panel::MemoryPanel;
    use crate::payments::MemoryPayments;
    use crate::store::MemoryStore;
    use crate::types::{EconomyError, Result};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use dashmap::DashSet;
    use serde_json::Value;

    pub(crate) struct Harness<S = MemoryStore> {
        pub economy: Economy,
        pub store: Arc<S>,
        pub panel: Arc<MemoryPanel>,
        pub payments: Arc<MemoryPayments>,
        pub clock: ManualClock,
    }

    /// Memory store whose writes to selected tables fail
    #[derive(Default)]
    pub(crate) struct FlakyStore {
        inner: MemoryStore,
        failing: DashSet<String>,
    }

    impl FlakyStore {
        pub fn fail_writes(&self, table: &str) {
            self.failing.insert(table.to_string());
        }

        fn check(&self, table: &str) -> Result<()> {
            if self.failing.contains(table) {
                return Err(EconomyError::Store(format!("write to {table} refused")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl KeyValueStore for FlakyStore {
        async fn get(&self, table: &str, key: &str) -> Result<Option<Value>> {
            self.inner.get(table, key).await
        }

        async fn set(&self, table: &str, key: &str, value: Value) -> Result<()> {
            self.check(table)?;
            self.inner.set(table, key, value).await
        }

        async fn delete(&self, table: &str, key: &str) -> Result<bool> {
            self.check(table)?;
            self.inner.delete(table, key).await
        }

        async fn increment(&self, table: &str, key: &str, delta: i64) -> Result<i64> {
            self.check(table)?;
            self.inner.increment(table, key, delta).await
        }
    }

    /// Economy over in-memory collaborators, starting at 2026-01-05 09:00 UTC
    pub(crate) fn harness() -> Harness {
        harness_over(Arc::new(MemoryStore::new()))
    }

    pub(crate) fn flaky_harness() -> Harness<FlakyStore> {
        harness_over(Arc::new(FlakyStore::default()))
    }

    fn harness_over<S: KeyValueStore + 'static>(store: Arc<S>) -> Harness<S> {
        let panel = Arc::new(MemoryPanel::new());
        let payments = Arc::new(MemoryPayments::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap());

        let economy = Economy::new(EconomyDeps {
            store: Arc::clone(&store) as Arc<dyn KeyValueStore>,
            panel: Arc::clone(&panel) as Arc<dyn PanelClient>,
            payments: Arc::clone(&payments) as Arc<dyn PaymentProcessor>,
            clock: Arc::new(clock.clone()),
            config: Arc::new(EconomyConfig::default()),
            day_offset: FixedOffset::east_opt(0).unwrap(),
        });

        Harness {
            economy,
            store,
            panel,
            payments,
            clock,
        }
    }
}
