//! Time-boxed server boosts
//!
//! A boost multiplies some build limits of one server for a fixed
//! duration. State per `(server, boost type)`:
//!
//! ```text
//! none -> active -> expired | cancelled
//!         active -> active            (extended)
//! none -> scheduled -> active | refunded
//! ```
//!
//! Every mutation of a server's boosts runs under the `boost-server:<id>`
//! scope lock, so the uniqueness check, the panel patch and the record
//! write cannot interleave with another apply, cancel or sweep on the same
//! server. The shared active map, the pending list and the history logs are
//! leaf locks taken briefly inside that scope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::{BoostDuration, BoostSpec, BoostType};
use crate::clock::Clock;
use crate::models::ServerLimits;
use crate::panel::{PanelClient, PanelServer};
use crate::services::ledger::{shortfall_as, LedgerService};
use crate::store::{KeyLocks, Table};
use crate::types::{EconomyError, Result};

pub const ACTIVE_BOOSTS_TABLE: &str = "active-boosts";
pub const SCHEDULED_BOOSTS_TABLE: &str = "scheduled-boosts";
pub const BOOST_HISTORY_TABLE: &str = "boost-history";

const ACTIVE_KEY: &str = "all";
const PENDING_KEY: &str = "pending";
const HISTORY_CAP: usize = 100;

/// `serverId -> boostId -> Boost`
pub type ActiveBoostMap = BTreeMap<String, BTreeMap<String, Boost>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Boost {
    pub id: String,
    pub user_id: String,
    pub server_id: String,
    pub server_name: String,
    pub boost_type: BoostType,
    pub duration: BoostDuration,
    /// Total paid-for duration, including extensions
    pub duration_ms: i64,
    pub applied_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Total coins paid, including extensions
    pub price: i64,
    pub applied_change: ServerLimits,
    /// Server limits before any boost was applied to it
    pub initial_resources: ServerLimits,
    pub boosted_resources: ServerLimits,
}

impl Boost {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn remaining_ms(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_milliseconds().max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledBoost {
    pub id: String,
    pub user_id: String,
    pub server_id: String,
    pub server_name: String,
    pub boost_type: BoostType,
    pub duration: BoostDuration,
    /// Coins already taken at scheduling time
    pub price: i64,
    pub scheduled_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoostActivityKind {
    Applied,
    Extended,
    Cancelled,
    Expired,
    Scheduled,
    ScheduledCancelled,
    ScheduledApplied,
    ScheduledFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoostActivity {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: BoostActivityKind,
    pub boost_id: String,
    pub server_id: String,
    pub server_name: String,
    pub boost_type: BoostType,
    pub duration: Option<BoostDuration>,
    /// Coin movement: negative when spent, positive when refunded
    pub coins: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Half of the unused share of the price, floored
pub fn cancel_refund(price: i64, duration_ms: i64, elapsed_ms: i64) -> i64 {
    if price <= 0 || duration_ms <= 0 {
        return 0;
    }
    let remaining = (duration_ms - elapsed_ms.max(0)).clamp(0, duration_ms);
    (i128::from(price) * i128::from(remaining) / (2 * i128::from(duration_ms))) as i64
}

/// Outcome of one expiry sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub failed: usize,
}

/// Outcome of one scheduled-boost dispatch pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub applied: usize,
    pub refunded: usize,
}

/// How an apply is paid for
#[derive(Debug, Clone, Copy)]
enum Payment {
    Debit,
    /// Taken when the boost was scheduled
    Prepaid,
}

/// The shared active-boost map
#[derive(Clone)]
pub struct ActiveBoostStore {
    table: Table<ActiveBoostMap>,
}

impl ActiveBoostStore {
    pub fn new(table: Table<ActiveBoostMap>) -> Self {
        Self { table }
    }

    pub async fn snapshot(&self) -> Result<ActiveBoostMap> {
        self.table.get_or_default(ACTIVE_KEY).await
    }

    pub async fn find(&self, boost_id: &str) -> Result<Option<Boost>> {
        Ok(self
            .snapshot()
            .await?
            .into_values()
            .find_map(|mut boosts| boosts.remove(boost_id)))
    }

    pub async fn for_user(&self, user_id: &str) -> Result<Vec<Boost>> {
        let mut boosts: Vec<Boost> = self
            .snapshot()
            .await?
            .into_values()
            .flat_map(|b| b.into_values())
            .filter(|b| b.user_id == user_id)
            .collect();
        boosts.sort_by_key(|b| b.expires_at);
        Ok(boosts)
    }

    /// Sum of the limit increases currently granted to `user_id`
    pub async fn allowance_for(&self, user_id: &str) -> Result<ServerLimits> {
        let mut total = ServerLimits::default();
        for boost in self.for_user(user_id).await? {
            total += boost.applied_change;
        }
        Ok(total)
    }

    async fn insert(&self, boost: Boost) -> Result<()> {
        self.table
            .update(ACTIVE_KEY, |map| {
                map.entry(boost.server_id.clone())
                    .or_default()
                    .insert(boost.id.clone(), boost);
                Ok(())
            })
            .await
    }

    async fn remove(&self, server_id: &str, boost_id: &str) -> Result<Option<Boost>> {
        self.table
            .update(ACTIVE_KEY, |map| {
                let removed = map.get_mut(server_id).and_then(|b| b.remove(boost_id));
                if map.get(server_id).is_some_and(|b| b.is_empty()) {
                    map.remove(server_id);
                }
                Ok(removed)
            })
            .await
    }

    async fn replace(&self, boost: Boost) -> Result<()> {
        self.table
            .update(ACTIVE_KEY, |map| {
                match map.get_mut(&boost.server_id).and_then(|b| b.get_mut(&boost.id)) {
                    Some(slot) => {
                        *slot = boost;
                        Ok(())
                    }
                    None => Err(EconomyError::BoostNotFound(boost.id.clone())),
                }
            })
            .await
    }
}

pub struct BoostEngine {
    ledger: Arc<LedgerService>,
    panel: Arc<dyn PanelClient>,
    active: ActiveBoostStore,
    scheduled: Table<Vec<ScheduledBoost>>,
    history: Table<Vec<BoostActivity>>,
    locks: Arc<KeyLocks>,
    clock: Arc<dyn Clock>,
}

impl BoostEngine {
    pub fn new(
        ledger: Arc<LedgerService>,
        panel: Arc<dyn PanelClient>,
        active: ActiveBoostStore,
        scheduled: Table<Vec<ScheduledBoost>>,
        history: Table<Vec<BoostActivity>>,
        locks: Arc<KeyLocks>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            panel,
            active,
            scheduled,
            history,
            locks,
            clock,
        }
    }

    // =========================================================================
    // Read views
    // =========================================================================

    pub fn types(&self) -> Vec<&'static BoostSpec> {
        BoostType::ALL.iter().map(|t| t.spec()).collect()
    }

    pub async fn active(&self, user_id: &str) -> Result<Vec<Boost>> {
        self.active.for_user(user_id).await
    }

    pub async fn scheduled(&self, user_id: &str) -> Result<Vec<ScheduledBoost>> {
        let mut pending: Vec<ScheduledBoost> = self
            .scheduled
            .get_or_default(PENDING_KEY)
            .await?
            .into_iter()
            .filter(|s| s.user_id == user_id)
            .collect();
        pending.sort_by_key(|s| s.scheduled_time);
        Ok(pending)
    }

    pub async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<BoostActivity>> {
        let mut entries = self.history.get_or_default(user_id).await?;
        entries.truncate(limit);
        Ok(entries)
    }

    // =========================================================================
    // Apply
    // =========================================================================

    pub async fn apply(
        &self,
        user_id: &str,
        server_id: &str,
        boost_type: BoostType,
        duration: BoostDuration,
    ) -> Result<Boost> {
        let _scope = self.locks.lock(server_scope(server_id)).await;
        let boost = self
            .apply_locked(user_id, server_id, boost_type, duration, Payment::Debit)
            .await?;

        self.log(
            user_id,
            activity(BoostActivityKind::Applied, &boost, -boost.price, self.clock.now()),
        )
        .await;
        info!(
            user_id = %user_id,
            server_id = %server_id,
            boost_id = %boost.id,
            boost_type = %boost_type,
            duration = %duration,
            price = boost.price,
            "Boost applied"
        );
        Ok(boost)
    }

    /// Caller holds the server scope lock
    async fn apply_locked(
        &self,
        user_id: &str,
        server_id: &str,
        boost_type: BoostType,
        duration: BoostDuration,
        payment: Payment,
    ) -> Result<Boost> {
        // Uniqueness holds whoever asks, so it is checked before ownership
        let snapshot = self.active.snapshot().await?;
        let on_server = snapshot.get(server_id);
        let taken = on_server.is_some_and(|b| b.values().any(|b| b.boost_type == boost_type));
        if taken {
            return Err(EconomyError::BoostAlreadyActive {
                server_id: server_id.to_string(),
                boost_type: boost_type.to_string(),
            });
        }

        let server = self.owned_server(user_id, server_id).await?;

        let price = boost_type.price(duration);
        if let Payment::Debit = payment {
            let available = self.ledger.balance(user_id).await?;
            if available < price {
                return Err(EconomyError::InsufficientCoins {
                    required: price,
                    available,
                });
            }
        }

        let current = server.limits;
        let change = boost_type.applied_change(&current);
        let boosted = current + change;
        // Stacked boosts share the limits the server had before its first boost
        let base = on_server
            .and_then(|b| b.values().next())
            .map(|b| b.initial_resources)
            .unwrap_or(current);
        self.panel.patch_server_build(server_id, boosted).await?;

        if let Payment::Debit = payment {
            if let Err(err) = self.ledger.debit(user_id, price).await {
                // Balance moved between the check and the debit
                self.restore_limits(server_id, current).await;
                return Err(shortfall_as(err, |required, available| {
                    EconomyError::InsufficientCoins {
                        required,
                        available,
                    }
                }));
            }
        }

        let now = self.clock.now();
        let boost = Boost {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            server_id: server_id.to_string(),
            server_name: server.name.clone(),
            boost_type,
            duration,
            duration_ms: duration.as_millis(),
            applied_at: now,
            expires_at: now + duration.as_duration(),
            price,
            applied_change: change,
            initial_resources: base,
            boosted_resources: boosted,
        };

        if let Err(err) = self.active.insert(boost.clone()).await {
            error!(server_id = %server_id, error = %err, "Failed to persist boost, rolling back");
            self.restore_limits(server_id, current).await;
            if let Payment::Debit = payment {
                self.refund(user_id, price).await;
            }
            return Err(err);
        }

        Ok(boost)
    }

    // =========================================================================
    // Cancel / extend
    // =========================================================================

    /// Cancel early for a half refund of the unused time
    pub async fn cancel(&self, user_id: &str, boost_id: &str) -> Result<i64> {
        let server_id = self.locate(boost_id).await?;
        let _scope = self.locks.lock(server_scope(&server_id)).await;

        let boost = self.owned_boost(user_id, boost_id).await?;
        let now = self.clock.now();
        let elapsed = (now - boost.applied_at).num_milliseconds();
        let refund = cancel_refund(boost.price, boost.duration_ms, elapsed);

        self.revert(&boost).await?;
        self.active.remove(&boost.server_id, &boost.id).await?;
        if refund > 0 {
            self.ledger.credit(user_id, refund).await?;
        }

        self.log(user_id, activity(BoostActivityKind::Cancelled, &boost, refund, now))
            .await;
        info!(user_id = %user_id, boost_id = %boost_id, refund, "Boost cancelled");
        Ok(refund)
    }

    /// Push expiry forward without touching panel limits
    pub async fn extend(
        &self,
        user_id: &str,
        boost_id: &str,
        duration: BoostDuration,
    ) -> Result<Boost> {
        let server_id = self.locate(boost_id).await?;
        let _scope = self.locks.lock(server_scope(&server_id)).await;

        let mut boost = self.owned_boost(user_id, boost_id).await?;
        let now = self.clock.now();
        if boost.is_expired(now) {
            return Err(EconomyError::Validation(
                "Boost has already expired".to_string(),
            ));
        }

        let price = boost.boost_type.price(duration);
        self.ledger
            .debit(user_id, price)
            .await
            .map_err(|e| shortfall_as(e, insufficient_coins))?;

        boost.expires_at += duration.as_duration();
        boost.duration_ms += duration.as_millis();
        boost.price += price;

        if let Err(err) = self.active.replace(boost.clone()).await {
            self.refund(user_id, price).await;
            return Err(err);
        }

        let mut entry = activity(BoostActivityKind::Extended, &boost, -price, now);
        entry.duration = Some(duration);
        self.log(user_id, entry).await;
        info!(
            user_id = %user_id,
            boost_id = %boost_id,
            extension = %duration,
            expires_at = %boost.expires_at,
            "Boost extended"
        );
        Ok(boost)
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Pay now, apply at `scheduled_time`
    pub async fn schedule(
        &self,
        user_id: &str,
        server_id: &str,
        boost_type: BoostType,
        duration: BoostDuration,
        scheduled_time: DateTime<Utc>,
    ) -> Result<ScheduledBoost> {
        let now = self.clock.now();
        if scheduled_time <= now {
            return Err(EconomyError::Validation(
                "Scheduled time must be in the future".to_string(),
            ));
        }

        let server = self.owned_server(user_id, server_id).await?;
        let price = boost_type.price(duration);
        self.ledger
            .debit(user_id, price)
            .await
            .map_err(|e| shortfall_as(e, insufficient_coins))?;

        let entry = ScheduledBoost {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            server_id: server_id.to_string(),
            server_name: server.name,
            boost_type,
            duration,
            price,
            scheduled_time,
            created_at: now,
        };

        let pushed = entry.clone();
        if let Err(err) = self
            .scheduled
            .update(PENDING_KEY, |pending| {
                pending.push(pushed);
                Ok(())
            })
            .await
        {
            self.refund(user_id, price).await;
            return Err(err);
        }

        self.log(
            user_id,
            scheduled_activity(BoostActivityKind::Scheduled, &entry, -price, now, None),
        )
        .await;
        info!(
            user_id = %user_id,
            server_id = %server_id,
            scheduled_id = %entry.id,
            scheduled_time = %scheduled_time,
            "Boost scheduled"
        );
        Ok(entry)
    }

    /// Full refund of a boost that has not been dispatched yet
    pub async fn cancel_scheduled(&self, user_id: &str, scheduled_id: &str) -> Result<i64> {
        let entry = self
            .scheduled
            .update(PENDING_KEY, |pending| {
                let idx = pending
                    .iter()
                    .position(|s| s.id == scheduled_id)
                    .ok_or_else(|| EconomyError::ScheduledBoostNotFound(scheduled_id.to_string()))?;
                if pending[idx].user_id != user_id {
                    return Err(EconomyError::NotOwner("scheduled boost".to_string()));
                }
                Ok(pending.remove(idx))
            })
            .await?;

        self.ledger.credit(user_id, entry.price).await?;
        self.log(
            user_id,
            scheduled_activity(
                BoostActivityKind::ScheduledCancelled,
                &entry,
                entry.price,
                self.clock.now(),
                None,
            ),
        )
        .await;
        info!(user_id = %user_id, scheduled_id = %scheduled_id, "Scheduled boost cancelled");
        Ok(entry.price)
    }

    // =========================================================================
    // Background passes
    // =========================================================================

    /// Revert and remove every boost whose expiry has passed
    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let due: Vec<(String, String)> = self
            .active
            .snapshot()
            .await?
            .into_values()
            .flat_map(|b| b.into_values())
            .filter(|b| b.is_expired(now))
            .map(|b| (b.server_id, b.id))
            .collect();

        let mut report = SweepReport::default();
        for (server_id, boost_id) in due {
            match self.expire_one(&server_id, &boost_id).await {
                Ok(true) => report.expired += 1,
                Ok(false) => {}
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        server_id = %server_id,
                        boost_id = %boost_id,
                        error = %err,
                        "Failed to expire boost, will retry next sweep"
                    );
                }
            }
        }

        if report.expired > 0 || report.failed > 0 {
            info!(expired = report.expired, failed = report.failed, "Boost sweep complete");
        }
        Ok(report)
    }

    async fn expire_one(&self, server_id: &str, boost_id: &str) -> Result<bool> {
        let _scope = self.locks.lock(server_scope(server_id)).await;

        // Re-read: a request may have cancelled or extended it meanwhile
        let now = self.clock.now();
        let boost = match self.active.snapshot().await?.get(server_id).and_then(|b| b.get(boost_id)) {
            Some(b) if b.is_expired(now) => b.clone(),
            _ => return Ok(false),
        };

        match self.revert(&boost).await {
            Ok(()) => {}
            Err(EconomyError::ServerNotFound(_)) => {
                debug!(server_id = %server_id, "Boosted server no longer exists, dropping boost");
            }
            Err(err) => return Err(err),
        }

        self.active.remove(server_id, boost_id).await?;
        self.log(
            &boost.user_id,
            activity(BoostActivityKind::Expired, &boost, 0, now),
        )
        .await;
        Ok(true)
    }

    /// Apply every scheduled boost that is due, refunding the ones that fail
    pub async fn dispatch_scheduled(&self) -> Result<DispatchReport> {
        let now = self.clock.now();
        let due = self
            .scheduled
            .update(PENDING_KEY, |pending| {
                let (due, later): (Vec<_>, Vec<_>) =
                    pending.drain(..).partition(|s| s.scheduled_time <= now);
                *pending = later;
                Ok(due)
            })
            .await?;

        let mut report = DispatchReport::default();
        for entry in due {
            let result = {
                let _scope = self.locks.lock(server_scope(&entry.server_id)).await;
                self.apply_locked(
                    &entry.user_id,
                    &entry.server_id,
                    entry.boost_type,
                    entry.duration,
                    Payment::Prepaid,
                )
                .await
            };

            match result {
                Ok(boost) => {
                    report.applied += 1;
                    self.log(
                        &entry.user_id,
                        scheduled_activity(
                            BoostActivityKind::ScheduledApplied,
                            &entry,
                            0,
                            self.clock.now(),
                            Some(boost.id.clone()),
                        ),
                    )
                    .await;
                    info!(
                        user_id = %entry.user_id,
                        server_id = %entry.server_id,
                        boost_id = %boost.id,
                        "Scheduled boost applied"
                    );
                }
                Err(err) => {
                    report.refunded += 1;
                    warn!(
                        user_id = %entry.user_id,
                        server_id = %entry.server_id,
                        scheduled_id = %entry.id,
                        error = %err,
                        "Scheduled boost failed, refunding"
                    );
                    self.refund(&entry.user_id, entry.price).await;
                    let mut failed = scheduled_activity(
                        BoostActivityKind::ScheduledFailed,
                        &entry,
                        entry.price,
                        self.clock.now(),
                        None,
                    );
                    failed.details = Some(err.public_message());
                    self.log(&entry.user_id, failed).await;
                }
            }
        }
        Ok(report)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn owned_server(&self, user_id: &str, server_id: &str) -> Result<PanelServer> {
        let server = self
            .panel
            .get_server(server_id)
            .await?
            .ok_or_else(|| EconomyError::ServerNotFound(server_id.to_string()))?;
        if server.owner_id != user_id {
            return Err(EconomyError::NotOwner("server".to_string()));
        }
        Ok(server)
    }

    async fn locate(&self, boost_id: &str) -> Result<String> {
        self.active
            .find(boost_id)
            .await?
            .map(|b| b.server_id)
            .ok_or_else(|| EconomyError::BoostNotFound(boost_id.to_string()))
    }

    /// Re-read under the scope lock and check ownership
    async fn owned_boost(&self, user_id: &str, boost_id: &str) -> Result<Boost> {
        let boost = self
            .active
            .find(boost_id)
            .await?
            .ok_or_else(|| EconomyError::BoostNotFound(boost_id.to_string()))?;
        if boost.user_id != user_id {
            return Err(EconomyError::NotOwner("boost".to_string()));
        }
        Ok(boost)
    }

    /// Take this boost's delta back off the server.
    ///
    /// With no other boost on the server the limits go back to
    /// `initial_resources`, the pre-boost base every stacked boost on the
    /// server carries. Otherwise only this boost's `applied_change` is
    /// subtracted from the live limits.
    async fn revert(&self, boost: &Boost) -> Result<()> {
        let others = self
            .active
            .snapshot()
            .await?
            .get(&boost.server_id)
            .is_some_and(|b| b.keys().any(|id| id != &boost.id));

        let target = if others {
            let current = self
                .panel
                .get_server(&boost.server_id)
                .await?
                .ok_or_else(|| EconomyError::ServerNotFound(boost.server_id.clone()))?;
            current.limits - boost.applied_change
        } else {
            boost.initial_resources
        };

        self.panel.patch_server_build(&boost.server_id, target).await
    }

    async fn restore_limits(&self, server_id: &str, limits: ServerLimits) {
        if let Err(err) = self.panel.patch_server_build(server_id, limits).await {
            error!(
                server_id = %server_id,
                error = %err,
                "Failed to roll back boosted limits"
            );
        }
    }

    async fn refund(&self, user_id: &str, amount: i64) {
        if amount <= 0 {
            return;
        }
        if let Err(err) = self.ledger.credit(user_id, amount).await {
            error!(user_id = %user_id, amount, error = %err, "Boost refund failed");
        }
    }

    async fn log(&self, user_id: &str, entry: BoostActivity) {
        if let Err(err) = self.history.push_capped(user_id, entry, HISTORY_CAP).await {
            warn!(user_id = %user_id, error = %err, "Failed to record boost activity");
        }
    }
}

fn server_scope(server_id: &str) -> String {
    format!("boost-server:{server_id}")
}

fn insufficient_coins(required: i64, available: i64) -> EconomyError {
    EconomyError::InsufficientCoins {
        required,
        available,
    }
}

fn activity(kind: BoostActivityKind, boost: &Boost, coins: i64, at: DateTime<Utc>) -> BoostActivity {
    BoostActivity {
        id: Uuid::new_v4().to_string(),
        kind,
        boost_id: boost.id.clone(),
        server_id: boost.server_id.clone(),
        server_name: boost.server_name.clone(),
        boost_type: boost.boost_type,
        duration: Some(boost.duration),
        coins,
        timestamp: at,
        details: None,
    }
}

fn scheduled_activity(
    kind: BoostActivityKind,
    entry: &ScheduledBoost,
    coins: i64,
    at: DateTime<Utc>,
    boost_id: Option<String>,
) -> BoostActivity {
    BoostActivity {
        id: Uuid::new_v4().to_string(),
        kind,
        boost_id: boost_id.unwrap_or_else(|| entry.id.clone()),
        server_id: entry.server_id.clone(),
        server_name: entry.server_name.clone(),
        boost_type: entry.boost_type,
        duration: Some(entry.duration),
        coins,
        timestamp: at,
        details: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::harness;
    use chrono::Duration;
    use tokio_test::assert_err;

    #[test]
    fn test_cancel_refund_bounds() {
        let hour = 3_600_000;
        assert_eq!(cancel_refund(100, hour, 0), 50);
        assert_eq!(cancel_refund(101, hour, 0), 50);
        assert_eq!(cancel_refund(100, hour, hour / 2), 25);
        assert_eq!(cancel_refund(100, hour, hour), 0);
        assert_eq!(cancel_refund(100, hour, hour * 3), 0);
        // Clock skew before applied_at never refunds more than half
        assert_eq!(cancel_refund(100, hour, -5_000), 50);

        for step in 0..=60 {
            let refund = cancel_refund(1400, hour, step * 60_000);
            assert!((0..=700).contains(&refund));
        }
    }

    #[tokio::test]
    async fn test_cpu_boost_patches_and_sweep_reverts() {
        let h = harness();
        h.panel.add_server("s1", "u1", ServerLimits::new(1024, 2048, 100));
        h.economy.ledger.credit("u1", 500).await.unwrap();

        let boost = h
            .economy
            .boosts
            .apply("u1", "s1", BoostType::Cpu, BoostDuration::OneHour)
            .await
            .unwrap();
        assert_eq!(boost.applied_change, ServerLimits::new(0, 0, 200));
        assert_eq!(h.panel.server("s1").unwrap().limits.cpu, 300);
        assert_eq!(h.economy.ledger.balance("u1").await.unwrap(), 400);

        h.clock.advance(Duration::hours(1));
        let report = h.economy.boosts.sweep_expired().await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(
            h.panel.server("s1").unwrap().limits,
            ServerLimits::new(1024, 2048, 100)
        );
        assert!(h.economy.boosts.active("u1").await.unwrap().is_empty());

        let patches = h.panel.patch_calls();
        let again = h.economy.boosts.sweep_expired().await.unwrap();
        assert_eq!(again, SweepReport::default());
        assert_eq!(h.panel.patch_calls(), patches);
    }

    #[tokio::test]
    async fn test_same_type_is_unique_per_server() {
        let h = harness();
        h.panel.add_server("s1", "u1", ServerLimits::new(1024, 2048, 100));
        h.economy.ledger.credit("u1", 1000).await.unwrap();

        h.economy
            .boosts
            .apply("u1", "s1", BoostType::Ram, BoostDuration::OneHour)
            .await
            .unwrap();
        let err = assert_err!(
            h.economy
                .boosts
                .apply("u1", "s1", BoostType::Ram, BoostDuration::SixHours)
                .await
        );
        assert!(matches!(err, EconomyError::BoostAlreadyActive { .. }));

        // A different type stacks
        h.economy
            .boosts
            .apply("u1", "s1", BoostType::Disk, BoostDuration::OneHour)
            .await
            .unwrap();
        assert_eq!(
            h.panel.server("s1").unwrap().limits,
            ServerLimits::new(2048, 4096, 100)
        );
    }

    #[tokio::test]
    async fn test_stacked_boosts_expire_back_to_base_in_either_order() {
        let base = ServerLimits::new(1024, 2048, 100);
        let orders = [
            (BoostType::Ram, BoostType::Performance),
            (BoostType::Performance, BoostType::Ram),
        ];

        for (first, second) in orders {
            let h = harness();
            h.panel.add_server("s1", "u1", base);
            h.economy.ledger.credit("u1", 5000).await.unwrap();

            let early = h
                .economy
                .boosts
                .apply("u1", "s1", first, BoostDuration::OneHour)
                .await
                .unwrap();
            let late = h
                .economy
                .boosts
                .apply("u1", "s1", second, BoostDuration::SixHours)
                .await
                .unwrap();
            assert_eq!(early.initial_resources, base);
            assert_eq!(late.initial_resources, base);

            h.clock.advance(Duration::hours(1));
            assert_eq!(h.economy.boosts.sweep_expired().await.unwrap().expired, 1);
            assert_eq!(
                h.panel.server("s1").unwrap().limits,
                base + late.applied_change,
                "{first} expiring under {second}"
            );

            h.clock.advance(Duration::hours(5));
            assert_eq!(h.economy.boosts.sweep_expired().await.unwrap().expired, 1);
            assert_eq!(h.panel.server("s1").unwrap().limits, base, "{first} then {second}");
        }
    }

    #[tokio::test]
    async fn test_cancelling_last_stacked_boost_restores_base() {
        let base = ServerLimits::new(1024, 2048, 100);
        let h = harness();
        h.panel.add_server("s1", "u1", base);
        h.economy.ledger.credit("u1", 5000).await.unwrap();

        let cpu = h
            .economy
            .boosts
            .apply("u1", "s1", BoostType::Cpu, BoostDuration::OneHour)
            .await
            .unwrap();
        let disk = h
            .economy
            .boosts
            .apply("u1", "s1", BoostType::Disk, BoostDuration::OneHour)
            .await
            .unwrap();

        h.economy.boosts.cancel("u1", &cpu.id).await.unwrap();
        h.economy.boosts.cancel("u1", &disk.id).await.unwrap();
        assert_eq!(h.panel.server("s1").unwrap().limits, base);
    }

    #[tokio::test]
    async fn test_boosted_server_rejects_same_type_from_another_user() {
        let h = harness();
        h.panel.add_server("s1", "u1", ServerLimits::new(1024, 2048, 100));
        h.economy.ledger.credit("u1", 500).await.unwrap();
        h.economy.ledger.credit("u2", 5000).await.unwrap();

        h.economy
            .boosts
            .apply("u1", "s1", BoostType::Cpu, BoostDuration::OneHour)
            .await
            .unwrap();

        let err = assert_err!(
            h.economy
                .boosts
                .apply("u2", "s1", BoostType::Cpu, BoostDuration::OneHour)
                .await
        );
        assert!(matches!(err, EconomyError::BoostAlreadyActive { .. }));

        // A free type still needs ownership
        let err = assert_err!(
            h.economy
                .boosts
                .apply("u2", "s1", BoostType::Ram, BoostDuration::OneHour)
                .await
        );
        assert!(matches!(err, EconomyError::NotOwner(_)));
        assert_eq!(h.economy.ledger.balance("u2").await.unwrap(), 5000);
    }

    #[tokio::test]
    async fn test_panel_failure_leaves_no_trace() {
        let h = harness();
        h.panel.add_server("s1", "u1", ServerLimits::new(1024, 2048, 100));
        h.economy.ledger.credit("u1", 500).await.unwrap();
        h.panel.fail_server("s1");

        assert_err!(
            h.economy
                .boosts
                .apply("u1", "s1", BoostType::Cpu, BoostDuration::OneHour)
                .await
        );
        assert_eq!(h.economy.ledger.balance("u1").await.unwrap(), 500);
        assert!(h.economy.boosts.active("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_checks_coins_and_ownership() {
        let h = harness();
        h.panel.add_server("s1", "u1", ServerLimits::new(1024, 2048, 100));
        h.economy.ledger.credit("u2", 5000).await.unwrap();
        h.economy.ledger.credit("u1", 10).await.unwrap();

        let err = assert_err!(
            h.economy
                .boosts
                .apply("u2", "s1", BoostType::Cpu, BoostDuration::OneHour)
                .await
        );
        assert!(matches!(err, EconomyError::NotOwner(_)));

        let err = assert_err!(
            h.economy
                .boosts
                .apply("u1", "s1", BoostType::Cpu, BoostDuration::OneHour)
                .await
        );
        assert!(matches!(
            err,
            EconomyError::InsufficientCoins { required: 100, available: 10 }
        ));
        assert_eq!(h.panel.patch_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_refunds_half_of_unused_time() {
        let h = harness();
        h.panel.add_server("s1", "u1", ServerLimits::new(1024, 2048, 100));
        h.economy.ledger.credit("u1", 1000).await.unwrap();

        let boost = h
            .economy
            .boosts
            .apply("u1", "s1", BoostType::Ram, BoostDuration::OneDay)
            .await
            .unwrap();
        assert_eq!(h.economy.ledger.balance("u1").await.unwrap(), 100);

        let err = assert_err!(h.economy.boosts.cancel("u2", &boost.id).await);
        assert!(matches!(err, EconomyError::NotOwner(_)));

        h.clock.advance(Duration::hours(12));
        let refund = h.economy.boosts.cancel("u1", &boost.id).await.unwrap();
        assert_eq!(refund, 225);
        assert_eq!(h.economy.ledger.balance("u1").await.unwrap(), 325);
        assert_eq!(h.panel.server("s1").unwrap().limits.memory, 1024);

        let history = h.economy.boosts.history("u1", 10).await.unwrap();
        assert_eq!(history[0].kind, BoostActivityKind::Cancelled);
        assert_eq!(history[0].coins, 225);
    }

    #[tokio::test]
    async fn test_extend_moves_expiry_only() {
        let h = harness();
        h.panel.add_server("s1", "u1", ServerLimits::new(1024, 2048, 100));
        h.economy.ledger.credit("u1", 1000).await.unwrap();

        let boost = h
            .economy
            .boosts
            .apply("u1", "s1", BoostType::Cpu, BoostDuration::OneHour)
            .await
            .unwrap();
        let patches = h.panel.patch_calls();

        let extended = h
            .economy
            .boosts
            .extend("u1", &boost.id, BoostDuration::SixHours)
            .await
            .unwrap();
        assert_eq!(extended.expires_at, boost.expires_at + Duration::hours(6));
        assert_eq!(extended.price, 100 + 450);
        assert_eq!(extended.duration_ms, 7 * 3_600_000);
        assert_eq!(h.panel.patch_calls(), patches);
        assert_eq!(h.economy.ledger.balance("u1").await.unwrap(), 450);

        // Original expiry passes, extended boost survives the sweep
        h.clock.advance(Duration::hours(2));
        assert_eq!(h.economy.boosts.sweep_expired().await.unwrap().expired, 0);
        assert_eq!(h.panel.server("s1").unwrap().limits.cpu, 300);
    }

    #[tokio::test]
    async fn test_schedule_prepays_and_cancel_refunds() {
        let h = harness();
        h.panel.add_server("s1", "u1", ServerLimits::new(1024, 2048, 100));
        h.economy.ledger.credit("u1", 300).await.unwrap();
        let at = h.clock.now() + Duration::hours(2);

        let err = assert_err!(
            h.economy
                .boosts
                .schedule("u1", "s1", BoostType::Cpu, BoostDuration::OneHour, h.clock.now())
                .await
        );
        assert!(matches!(err, EconomyError::Validation(_)));

        let entry = h
            .economy
            .boosts
            .schedule("u1", "s1", BoostType::Cpu, BoostDuration::OneHour, at)
            .await
            .unwrap();
        assert_eq!(h.economy.ledger.balance("u1").await.unwrap(), 200);

        let refund = h.economy.boosts.cancel_scheduled("u1", &entry.id).await.unwrap();
        assert_eq!(refund, 100);
        assert_eq!(h.economy.ledger.balance("u1").await.unwrap(), 300);
        assert!(h.economy.boosts.scheduled("u1").await.unwrap().is_empty());

        let err = assert_err!(h.economy.boosts.cancel_scheduled("u1", &entry.id).await);
        assert!(matches!(err, EconomyError::ScheduledBoostNotFound(_)));
    }

    #[tokio::test]
    async fn test_dispatch_applies_due_and_refunds_failures() {
        let h = harness();
        h.panel.add_server("s1", "u1", ServerLimits::new(1024, 2048, 100));
        h.panel.add_server("s2", "u1", ServerLimits::new(1024, 2048, 100));
        h.economy.ledger.credit("u1", 1000).await.unwrap();
        let at = h.clock.now() + Duration::minutes(30);

        for server in ["s1", "s2"] {
            h.economy
                .boosts
                .schedule("u1", server, BoostType::Cpu, BoostDuration::OneHour, at)
                .await
                .unwrap();
        }
        assert_eq!(h.economy.ledger.balance("u1").await.unwrap(), 800);

        // Not due yet
        assert_eq!(
            h.economy.boosts.dispatch_scheduled().await.unwrap(),
            DispatchReport::default()
        );

        h.panel.remove_server("s2");
        h.clock.advance(Duration::minutes(31));
        let report = h.economy.boosts.dispatch_scheduled().await.unwrap();
        assert_eq!(report, DispatchReport { applied: 1, refunded: 1 });

        assert_eq!(h.panel.server("s1").unwrap().limits.cpu, 300);
        assert_eq!(h.economy.ledger.balance("u1").await.unwrap(), 900);
        assert!(h.economy.boosts.scheduled("u1").await.unwrap().is_empty());

        let kinds: Vec<_> = h
            .economy
            .boosts
            .history("u1", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.kind)
            .collect();
        assert!(kinds.contains(&BoostActivityKind::ScheduledApplied));
        assert!(kinds.contains(&BoostActivityKind::ScheduledFailed));
    }

    #[tokio::test]
    async fn test_sweep_skips_failing_server_and_retries() {
        let h = harness();
        h.panel.add_server("s1", "u1", ServerLimits::new(1024, 2048, 100));
        h.panel.add_server("s2", "u1", ServerLimits::new(1024, 2048, 100));
        h.economy.ledger.credit("u1", 1000).await.unwrap();
        for server in ["s1", "s2"] {
            h.economy
                .boosts
                .apply("u1", server, BoostType::Cpu, BoostDuration::OneHour)
                .await
                .unwrap();
        }

        h.panel.fail_server("s1");
        h.clock.advance(Duration::hours(2));
        let report = h.economy.boosts.sweep_expired().await.unwrap();
        assert_eq!(report, SweepReport { expired: 1, failed: 1 });
        assert_eq!(h.panel.server("s2").unwrap().limits.cpu, 100);

        h.panel.heal_server("s1");
        let report = h.economy.boosts.sweep_expired().await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(h.panel.server("s1").unwrap().limits.cpu, 100);
    }

    #[tokio::test]
    async fn test_boost_counts_as_allowance() {
        let h = harness();
        h.panel.add_server("s1", "u1", ServerLimits::new(1024, 2048, 100));
        h.economy.ledger.credit("u1", 500).await.unwrap();
        h.economy
            .boosts
            .apply("u1", "s1", BoostType::Cpu, BoostDuration::OneHour)
            .await
            .unwrap();

        let (entitlement, _) = h.economy.entitlement.for_user("u1").await.unwrap();
        assert_eq!(entitlement.boosts.cpu, 200);
        assert_eq!(entitlement.used.cpu, 300);
    }
}
