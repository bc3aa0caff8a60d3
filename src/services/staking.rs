//! Coin staking
//!
//! Users lock coins into one of the fixed plans. Rewards accrue once per
//! accrual pass for every stake whose last reward is at least a day old;
//! a missed pass is not caught up later. Claiming is the only terminal
//! transition and pays principal plus rewards, minus the plan's penalty
//! on principal when the lock period has not ended.
//!
//! Users holding active stakes are listed under one `active-stakers` key,
//! which is what the accrual pass walks.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::{PlanId, StakingPlan};
use crate::clock::Clock;
use crate::services::ledger::{shortfall_as, LedgerService};
use crate::store::{KeyLocks, Table};
use crate::types::{EconomyError, Result};

pub const STAKES_TABLE: &str = "stakes";
pub const ACTIVE_STAKERS_TABLE: &str = "active-stakers";
pub const STAKING_HISTORY_TABLE: &str = "staking-history";

const STAKERS_KEY: &str = "all";
const HISTORY_CAP: usize = 100;
const MAX_PROJECTION_DAYS: i64 = 3650;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StakeStatus {
    Active,
    Claimed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stake {
    pub id: String,
    pub user_id: String,
    pub plan_id: PlanId,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
    pub last_reward_time: DateTime<Utc>,
    pub accrued_rewards: f64,
    pub status: StakeStatus,
    /// `None` for plans without a lock period
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
}

impl Stake {
    pub fn is_active(&self) -> bool {
        self.status == StakeStatus::Active
    }

    pub fn plan(&self) -> &'static StakingPlan {
        self.plan_id.plan()
    }

    /// Claiming at `now` would forfeit the penalty
    pub fn is_early(&self, now: DateTime<Utc>) -> bool {
        match self.plan().min_duration() {
            Some(lock) => now < self.created_at + lock,
            None => false,
        }
    }

    fn settle(&self, now: DateTime<Utc>) -> Settlement {
        let penalty = if self.is_early(now) {
            self.plan().early_penalty(self.amount)
        } else {
            0.0
        };
        let gross = self.amount as f64 + self.accrued_rewards - penalty;
        Settlement {
            penalty,
            payout: gross.max(0.0).floor() as i64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Settlement {
    penalty: f64,
    payout: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StakingTransactionKind {
    Stake,
    Claim,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakingTransaction {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: StakingTransactionKind,
    pub stake_id: String,
    pub plan_id: PlanId,
    pub amount: i64,
    #[serde(default)]
    pub rewards: f64,
    #[serde(default)]
    pub penalty: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimOutcome {
    pub stake: Stake,
    pub payout: i64,
    pub penalty: f64,
    pub early: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StakingSummary {
    pub active_stakes: usize,
    pub total_staked: i64,
    pub total_accrued: f64,
    pub projected_daily: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeProjection {
    pub plan_id: PlanId,
    pub amount: i64,
    pub days: i64,
    pub rewards: f64,
    /// Charged when `days` is shorter than the lock period
    pub penalty: f64,
    pub net: f64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccrualReport {
    pub stakers: usize,
    pub accrued: usize,
    pub failed: usize,
}

pub struct StakingEngine {
    ledger: Arc<LedgerService>,
    stakes: Table<Vec<Stake>>,
    stakers: Table<Vec<String>>,
    history: Table<Vec<StakingTransaction>>,
    locks: Arc<KeyLocks>,
    clock: Arc<dyn Clock>,
}

impl StakingEngine {
    pub fn new(
        ledger: Arc<LedgerService>,
        stakes: Table<Vec<Stake>>,
        stakers: Table<Vec<String>>,
        history: Table<Vec<StakingTransaction>>,
        locks: Arc<KeyLocks>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            stakes,
            stakers,
            history,
            locks,
            clock,
        }
    }

    pub fn plans(&self) -> &'static [StakingPlan] {
        StakingPlan::all()
    }

    pub async fn create(&self, user_id: &str, plan_id: PlanId, amount: i64) -> Result<Stake> {
        let plan = plan_id.plan();
        if amount < plan.min_amount {
            return Err(EconomyError::InsufficientAmount {
                plan: plan_id.to_string(),
                amount,
                minimum: plan.min_amount,
            });
        }

        let _scope = self.locks.lock(user_scope(user_id)).await;
        self.ledger.debit(user_id, amount).await.map_err(|e| {
            shortfall_as(e, |required, available| EconomyError::InsufficientBalance {
                required,
                available,
            })
        })?;

        let now = self.clock.now();
        let stake = Stake {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            plan_id,
            amount,
            created_at: now,
            last_reward_time: now,
            accrued_rewards: 0.0,
            status: StakeStatus::Active,
            end_time: plan.min_duration().map(|lock| now + lock),
            claimed_at: None,
        };

        let pushed = stake.clone();
        if let Err(err) = self
            .stakes
            .update(user_id, |stakes| {
                stakes.push(pushed);
                Ok(())
            })
            .await
        {
            error!(user_id = %user_id, error = %err, "Failed to persist stake, refunding");
            if let Err(refund_err) = self.ledger.credit(user_id, amount).await {
                error!(user_id = %user_id, amount, error = %refund_err, "Stake refund failed");
            }
            return Err(err);
        }

        // A stake missing from the staker list would never accrue
        if let Err(err) = self
            .stakers
            .update(STAKERS_KEY, |users| {
                if !users.iter().any(|u| u == user_id) {
                    users.push(user_id.to_string());
                }
                Ok(())
            })
            .await
        {
            error!(user_id = %user_id, stake_id = %stake.id, error = %err, "Failed to register staker, rolling back stake");
            let removed = self
                .stakes
                .update(user_id, |stakes| {
                    stakes.retain(|s| s.id != stake.id);
                    Ok(())
                })
                .await;
            match removed {
                Ok(()) => {
                    if let Err(refund_err) = self.ledger.credit(user_id, amount).await {
                        error!(user_id = %user_id, amount, error = %refund_err, "Stake refund failed");
                    }
                }
                Err(remove_err) => {
                    error!(user_id = %user_id, stake_id = %stake.id, error = %remove_err, "Failed to roll back stake");
                }
            }
            return Err(err);
        }

        self.record(
            user_id,
            StakingTransaction {
                id: Uuid::new_v4().to_string(),
                kind: StakingTransactionKind::Stake,
                stake_id: stake.id.clone(),
                plan_id,
                amount,
                rewards: 0.0,
                penalty: 0.0,
                timestamp: now,
            },
        )
        .await;
        info!(user_id = %user_id, stake_id = %stake.id, plan = %plan_id, amount, "Stake created");
        Ok(stake)
    }

    pub async fn claim(&self, user_id: &str, stake_id: &str) -> Result<ClaimOutcome> {
        let _scope = self.locks.lock(user_scope(user_id)).await;
        let now = self.clock.now();

        // Marked claimed before paying out; a failed credit flips it back
        let (stake, settlement, others_active) = self
            .stakes
            .update(user_id, |stakes| {
                let stake = stakes
                    .iter_mut()
                    .find(|s| s.id == stake_id)
                    .ok_or_else(|| EconomyError::StakeNotFound(stake_id.to_string()))?;
                if !stake.is_active() {
                    return Err(EconomyError::StakeNotActive(stake_id.to_string()));
                }
                let settlement = stake.settle(now);
                stake.status = StakeStatus::Claimed;
                stake.claimed_at = Some(now);
                let claimed = stake.clone();
                let others_active = stakes.iter().any(|s| s.is_active());
                Ok((claimed, settlement, others_active))
            })
            .await?;

        if settlement.payout > 0 {
            if let Err(err) = self.ledger.credit(user_id, settlement.payout).await {
                error!(user_id = %user_id, stake_id = %stake_id, error = %err, "Stake payout failed");
                self.reopen(user_id, stake_id).await;
                return Err(err);
            }
        }

        if !others_active {
            self.stakers
                .update(STAKERS_KEY, |users| {
                    users.retain(|u| u != user_id);
                    Ok(())
                })
                .await?;
        }

        let early = settlement.penalty > 0.0;
        self.record(
            user_id,
            StakingTransaction {
                id: Uuid::new_v4().to_string(),
                kind: StakingTransactionKind::Claim,
                stake_id: stake.id.clone(),
                plan_id: stake.plan_id,
                amount: settlement.payout,
                rewards: stake.accrued_rewards,
                penalty: settlement.penalty,
                timestamp: now,
            },
        )
        .await;
        info!(
            user_id = %user_id,
            stake_id = %stake_id,
            payout = settlement.payout,
            penalty = settlement.penalty,
            early,
            "Stake claimed"
        );

        Ok(ClaimOutcome {
            stake,
            payout: settlement.payout,
            penalty: settlement.penalty,
            early,
        })
    }

    async fn reopen(&self, user_id: &str, stake_id: &str) {
        let restored = self
            .stakes
            .update(user_id, |stakes| {
                if let Some(stake) = stakes.iter_mut().find(|s| s.id == stake_id) {
                    stake.status = StakeStatus::Active;
                    stake.claimed_at = None;
                }
                Ok(())
            })
            .await;
        if let Err(err) = restored {
            error!(user_id = %user_id, stake_id = %stake_id, error = %err, "Failed to reopen stake");
        }
    }

    /// One accrual pass over every active staker
    pub async fn accrue_daily(&self) -> Result<AccrualReport> {
        let stakers = self.stakers.get_or_default(STAKERS_KEY).await?;
        let mut report = AccrualReport {
            stakers: stakers.len(),
            ..Default::default()
        };

        for user_id in stakers {
            match self.accrue_user(&user_id).await {
                Ok(n) => report.accrued += n,
                Err(err) => {
                    report.failed += 1;
                    warn!(user_id = %user_id, error = %err, "Staking accrual failed for user");
                }
            }
        }

        info!(
            stakers = report.stakers,
            accrued = report.accrued,
            failed = report.failed,
            "Staking accrual pass complete"
        );
        Ok(report)
    }

    async fn accrue_user(&self, user_id: &str) -> Result<usize> {
        let _scope = self.locks.lock(user_scope(user_id)).await;
        let now = self.clock.now();

        let (accrued, any_active) = self
            .stakes
            .update(user_id, |stakes| {
                let mut accrued = 0;
                for stake in stakes.iter_mut().filter(|s| s.is_active()) {
                    if now - stake.last_reward_time >= Duration::hours(24) {
                        stake.accrued_rewards += stake.plan().daily_reward(stake.amount);
                        stake.last_reward_time = now;
                        accrued += 1;
                    }
                }
                Ok((accrued, stakes.iter().any(|s| s.is_active())))
            })
            .await?;

        if !any_active {
            debug!(user_id = %user_id, "Dropping user without active stakes from staker list");
            self.stakers
                .update(STAKERS_KEY, |users| {
                    users.retain(|u| u != user_id);
                    Ok(())
                })
                .await?;
        }
        Ok(accrued)
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<Stake>> {
        let mut stakes = self.stakes.get_or_default(user_id).await?;
        stakes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(stakes)
    }

    /// Totals over active stakes only
    pub async fn summary(&self, user_id: &str) -> Result<StakingSummary> {
        let stakes = self.stakes.get_or_default(user_id).await?;
        let mut summary = StakingSummary::default();
        for stake in stakes.iter().filter(|s| s.is_active()) {
            summary.active_stakes += 1;
            summary.total_staked += stake.amount;
            summary.total_accrued += stake.accrued_rewards;
            summary.projected_daily += stake.plan().daily_reward(stake.amount);
        }
        Ok(summary)
    }

    pub async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<StakingTransaction>> {
        let mut entries = self.history.get_or_default(user_id).await?;
        entries.truncate(limit);
        Ok(entries)
    }

    async fn record(&self, user_id: &str, entry: StakingTransaction) {
        if let Err(err) = self.history.push_capped(user_id, entry, HISTORY_CAP).await {
            warn!(user_id = %user_id, error = %err, "Failed to record staking transaction");
        }
    }
}

/// Projected outcome of staking `amount` on `plan_id` for `days` days
pub fn calculate(plan_id: PlanId, amount: i64, days: i64) -> Result<StakeProjection> {
    if amount <= 0 {
        return Err(EconomyError::Validation("Amount must be positive".to_string()));
    }
    if !(1..=MAX_PROJECTION_DAYS).contains(&days) {
        return Err(EconomyError::Validation(format!(
            "Days must be between 1 and {MAX_PROJECTION_DAYS}"
        )));
    }

    let plan = plan_id.plan();
    let rewards = plan.daily_reward(amount) * days as f64;
    let penalty = if days < plan.min_duration_days {
        plan.early_penalty(amount)
    } else {
        0.0
    };
    Ok(StakeProjection {
        plan_id,
        amount,
        days,
        rewards,
        penalty,
        net: amount as f64 + rewards - penalty,
    })
}

fn user_scope(user_id: &str) -> String {
    format!("staking:{user_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{flaky_harness, harness};
    use tokio_test::assert_err;

    #[tokio::test]
    async fn test_unregistered_staker_rolls_back_stake() {
        let h = flaky_harness();
        h.economy.ledger.credit("u1", 800).await.unwrap();
        h.store.fail_writes(ACTIVE_STAKERS_TABLE);

        let err = assert_err!(h.economy.staking.create("u1", PlanId::Bronze, 300).await);
        assert!(matches!(err, EconomyError::Store(_)));
        assert_eq!(h.economy.ledger.balance("u1").await.unwrap(), 800);
        assert!(h.economy.staking.list("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stake_more_than_balance_fails_untouched() {
        let h = harness();
        h.economy.ledger.credit("u1", 500).await.unwrap();

        let err = assert_err!(h.economy.staking.create("u1", PlanId::Silver, 600).await);
        assert!(matches!(
            err,
            EconomyError::InsufficientBalance { required: 600, available: 500 }
        ));
        assert_eq!(h.economy.ledger.balance("u1").await.unwrap(), 500);

        let err = assert_err!(h.economy.staking.create("u1", PlanId::Silver, 300).await);
        assert!(matches!(err, EconomyError::InsufficientAmount { minimum: 500, .. }));
        assert!(h.economy.staking.list("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flexible_claim_has_no_penalty() {
        let h = harness();
        h.economy.ledger.credit("u1", 1000).await.unwrap();
        let stake = h
            .economy
            .staking
            .create("u1", PlanId::Flexible, 730)
            .await
            .unwrap();
        assert!(stake.end_time.is_none());
        assert_eq!(h.economy.ledger.balance("u1").await.unwrap(), 270);

        h.clock.advance(Duration::hours(25));
        h.economy.staking.accrue_daily().await.unwrap();

        let outcome = h.economy.staking.claim("u1", &stake.id).await.unwrap();
        assert_eq!(outcome.penalty, 0.0);
        assert!(!outcome.early);
        // 730 * 5% / 365 = 0.1 per day, floored away at payout
        assert_eq!(outcome.payout, 730);
        assert!((outcome.stake.accrued_rewards - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_gold_claim_just_before_end_pays_penalty() {
        let h = harness();
        h.economy.ledger.credit("u1", 1000).await.unwrap();
        let stake = h.economy.staking.create("u1", PlanId::Gold, 1000).await.unwrap();
        let end = stake.end_time.unwrap();

        h.clock.set(end - Duration::milliseconds(1));
        let outcome = h.economy.staking.claim("u1", &stake.id).await.unwrap();
        assert_eq!(outcome.penalty, 400.0);
        assert_eq!(outcome.payout, 600);
        assert_eq!(h.economy.ledger.balance("u1").await.unwrap(), 600);

        let err = assert_err!(h.economy.staking.claim("u1", &stake.id).await);
        assert!(matches!(err, EconomyError::StakeNotActive(_)));
        let err = assert_err!(h.economy.staking.claim("u1", "missing").await);
        assert!(matches!(err, EconomyError::StakeNotFound(_)));
    }

    #[tokio::test]
    async fn test_claim_after_lock_has_no_penalty() {
        let h = harness();
        h.economy.ledger.credit("u1", 250).await.unwrap();
        let stake = h.economy.staking.create("u1", PlanId::Bronze, 250).await.unwrap();

        h.clock.advance(Duration::days(7));
        let outcome = h.economy.staking.claim("u1", &stake.id).await.unwrap();
        assert_eq!(outcome.penalty, 0.0);
        assert_eq!(outcome.payout, 250);
    }

    #[tokio::test]
    async fn test_accrual_is_one_tick_per_pass() {
        let h = harness();
        h.economy.ledger.credit("u1", 5000).await.unwrap();
        let stake = h
            .economy
            .staking
            .create("u1", PlanId::Platinum, 5000)
            .await
            .unwrap();

        // Under a day: nothing
        h.clock.advance(Duration::hours(23));
        assert_eq!(h.economy.staking.accrue_daily().await.unwrap().accrued, 0);

        // Three days missed still yields one tick
        h.clock.advance(Duration::days(3));
        assert_eq!(h.economy.staking.accrue_daily().await.unwrap().accrued, 1);
        assert_eq!(h.economy.staking.accrue_daily().await.unwrap().accrued, 0);

        let stakes = h.economy.staking.list("u1").await.unwrap();
        let expected = 5000.0 * 25.0 / 365.0 / 100.0;
        assert!((stakes[0].accrued_rewards - expected).abs() < 1e-9);
        assert_eq!(stakes[0].id, stake.id);
    }

    #[tokio::test]
    async fn test_staker_list_tracks_active_stakes() {
        let h = harness();
        h.economy.ledger.credit("u1", 2000).await.unwrap();
        let a = h.economy.staking.create("u1", PlanId::Flexible, 100).await.unwrap();
        let b = h.economy.staking.create("u1", PlanId::Flexible, 100).await.unwrap();

        h.economy.staking.claim("u1", &a.id).await.unwrap();
        assert_eq!(h.economy.staking.accrue_daily().await.unwrap().stakers, 1);

        h.economy.staking.claim("u1", &b.id).await.unwrap();
        assert_eq!(h.economy.staking.accrue_daily().await.unwrap().stakers, 0);

        let summary = h.economy.staking.summary("u1").await.unwrap();
        assert_eq!(summary, StakingSummary::default());
        assert_eq!(h.economy.staking.history("u1", 10).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_summary_counts_only_active() {
        let h = harness();
        h.economy.ledger.credit("u1", 2000).await.unwrap();
        let a = h.economy.staking.create("u1", PlanId::Flexible, 100).await.unwrap();
        h.economy.staking.create("u1", PlanId::Silver, 500).await.unwrap();
        h.economy.staking.claim("u1", &a.id).await.unwrap();

        let summary = h.economy.staking.summary("u1").await.unwrap();
        assert_eq!(summary.active_stakes, 1);
        assert_eq!(summary.total_staked, 500);
        assert_eq!(h.economy.staking.list("u1").await.unwrap().len(), 2);
    }

    #[test]
    fn test_calculate_projection() {
        let p = calculate(PlanId::Gold, 1000, 30).unwrap();
        assert_eq!(p.penalty, 400.0);
        assert!((p.rewards - 1000.0 * 0.18 / 365.0 * 30.0).abs() < 1e-9);

        let p = calculate(PlanId::Gold, 1000, 90).unwrap();
        assert_eq!(p.penalty, 0.0);

        assert!(calculate(PlanId::Flexible, 0, 10).is_err());
        assert!(calculate(PlanId::Flexible, 100, 0).is_err());
    }
}
