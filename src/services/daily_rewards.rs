//! Daily login rewards
//!
//! One claim per calendar day, where a day starts at local midnight for the
//! configured UTC offset. Consecutive days build a streak that scales the
//! reward; a missed day resets it unless streak protection covers the gap.

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::catalog::ProtectionLevel;
use crate::clock::Clock;
use crate::services::ledger::{shortfall_as, LedgerService};
use crate::store::{KeyLocks, Table};
use crate::types::{EconomyError, Result};

pub const DAILY_STREAKS_TABLE: &str = "daily-streaks";
pub const DAILY_HISTORY_TABLE: &str = "daily-history";
pub const DAILY_LEADERBOARD_TABLE: &str = "daily-leaderboard";

const LEADERBOARD_KEY: &str = "global";
const HISTORY_CAP: usize = 30;
const LEADERBOARD_CAP: usize = 50;

pub const BASE_REWARD: i64 = 25;
pub const MAX_STREAK_GAP: i64 = 1;

/// Multiplier for streak days 1 through 30
const MULTIPLIERS: [f64; 30] = [
    1.0, 1.05, 1.1, 1.15, 1.2, 1.25, 1.5, 1.3, 1.32, 1.35, 1.38, 1.4, 1.42, 1.75, 1.45, 1.48, 1.5,
    1.52, 1.55, 1.58, 2.0, 1.6, 1.65, 1.7, 1.75, 1.8, 1.85, 2.5, 1.9, 2.0,
];

/// `(streak day, bonus coins)`
const MILESTONES: [(u32, i64); 7] = [
    (7, 50),
    (14, 100),
    (21, 150),
    (28, 200),
    (30, 300),
    (60, 500),
    (90, 1000),
];

pub fn multiplier(streak: u32) -> f64 {
    match streak {
        0 => 1.0,
        1..=30 => MULTIPLIERS[streak as usize - 1],
        31..=59 => 2.0,
        60..=89 => 2.2,
        _ => 2.5,
    }
}

pub fn milestone_bonus(streak: u32) -> i64 {
    MILESTONES
        .iter()
        .find(|(day, _)| *day == streak)
        .map(|(_, bonus)| *bonus)
        .unwrap_or(0)
}

/// Next milestone strictly after `streak`
pub fn next_milestone(streak: u32) -> Option<Milestone> {
    MILESTONES
        .iter()
        .find(|(day, _)| *day > streak)
        .map(|&(day, bonus)| Milestone { day, bonus })
}

fn grants_protection(streak: u32) -> bool {
    matches!(streak, 30 | 60 | 90)
}

pub fn reward_for(streak: u32) -> i64 {
    (BASE_REWARD as f64 * multiplier(streak) + milestone_bonus(streak) as f64).floor() as i64
}

/// Start of the local day containing `now`, as a UTC instant
pub fn local_midnight(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let since_midnight = now
        .with_timezone(&offset)
        .time()
        .signed_duration_since(NaiveTime::MIN);
    now - since_midnight
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Milestone {
    pub day: u32,
    pub bonus: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DailyStreak {
    pub current_streak: u32,
    pub longest_streak: u32,
    /// Local midnight of the last claimed day
    pub last_claim_timestamp: Option<DateTime<Utc>>,
    pub total_claimed: u32,
    pub total_coins_earned: i64,
    /// Days of missed claims the streak can survive
    pub streak_protection: u32,
}

/// How a claim on `today` moves the streak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Transition {
    streak: u32,
    protection_used: bool,
    reset: bool,
}

impl DailyStreak {
    fn days_since_claim(&self, today: DateTime<Utc>) -> Option<i64> {
        self.last_claim_timestamp
            .map(|last| (today - last).num_days())
    }

    fn transition(&self, today: DateTime<Utc>) -> Transition {
        match self.days_since_claim(today) {
            None => Transition {
                streak: self.current_streak + 1,
                protection_used: false,
                reset: false,
            },
            Some(gap) if gap <= MAX_STREAK_GAP => Transition {
                streak: self.current_streak + 1,
                protection_used: false,
                reset: false,
            },
            Some(gap) if gap <= i64::from(self.streak_protection) => Transition {
                streak: self.current_streak + 1,
                protection_used: true,
                reset: false,
            },
            Some(_) => Transition {
                streak: 1,
                protection_used: false,
                reset: true,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyClaim {
    pub streak: u32,
    pub reward: i64,
    pub multiplier: f64,
    pub milestone_bonus: i64,
    pub protection_used: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyClaimOutcome {
    pub reward: i64,
    pub streak: u32,
    pub multiplier: f64,
    pub milestone_bonus: i64,
    pub protection_used: bool,
    pub streak_reset: bool,
    pub streak_protection: u32,
    pub next_claim_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStatus {
    #[serde(flatten)]
    pub streak: DailyStreak,
    pub can_claim: bool,
    /// Streak after claiming now (or today's streak if already claimed)
    pub next_streak: u32,
    pub next_reward: i64,
    pub next_multiplier: f64,
    pub next_milestone: Option<Milestone>,
    pub next_claim_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub total_coins_earned: i64,
    pub updated_at: DateTime<Utc>,
}

pub struct DailyRewardsEngine {
    ledger: Arc<LedgerService>,
    streaks: Table<DailyStreak>,
    history: Table<Vec<DailyClaim>>,
    leaderboard: Table<Vec<LeaderboardEntry>>,
    locks: Arc<KeyLocks>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
}

impl DailyRewardsEngine {
    pub fn new(
        ledger: Arc<LedgerService>,
        streaks: Table<DailyStreak>,
        history: Table<Vec<DailyClaim>>,
        leaderboard: Table<Vec<LeaderboardEntry>>,
        locks: Arc<KeyLocks>,
        clock: Arc<dyn Clock>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            ledger,
            streaks,
            history,
            leaderboard,
            locks,
            clock,
            offset,
        }
    }

    fn today(&self) -> DateTime<Utc> {
        local_midnight(self.clock.now(), self.offset)
    }

    pub async fn claim(&self, user_id: &str) -> Result<DailyClaimOutcome> {
        let _scope = self.locks.lock(user_scope(user_id)).await;
        let today = self.today();
        let previous = self.streaks.get_or_default(user_id).await?;

        if previous.last_claim_timestamp.is_some_and(|last| last >= today) {
            return Err(EconomyError::AlreadyClaimed);
        }

        let step = previous.transition(today);
        let multiplier = multiplier(step.streak);
        let bonus = milestone_bonus(step.streak);
        let reward = reward_for(step.streak);

        let mut streak = previous.clone();
        streak.current_streak = step.streak;
        streak.longest_streak = streak.longest_streak.max(step.streak);
        streak.last_claim_timestamp = Some(today);
        streak.total_claimed += 1;
        streak.total_coins_earned += reward;
        if step.protection_used {
            streak.streak_protection = streak.streak_protection.saturating_sub(1);
        }
        if grants_protection(step.streak) {
            streak.streak_protection = streak
                .streak_protection
                .max(ProtectionLevel::Bronze.days());
        }

        // Streak first so a failed credit can never be claimed twice
        self.streaks.put(user_id, &streak).await?;
        if let Err(err) = self.ledger.credit(user_id, reward).await {
            error!(user_id = %user_id, error = %err, "Daily reward credit failed, restoring streak");
            if let Err(restore_err) = self.streaks.put(user_id, &previous).await {
                error!(user_id = %user_id, error = %restore_err, "Failed to restore streak");
            }
            return Err(err);
        }

        let entry = DailyClaim {
            streak: step.streak,
            reward,
            multiplier,
            milestone_bonus: bonus,
            protection_used: step.protection_used,
            timestamp: self.clock.now(),
        };
        if let Err(err) = self.history.push_capped(user_id, entry, HISTORY_CAP).await {
            warn!(user_id = %user_id, error = %err, "Failed to record daily claim");
        }

        info!(
            user_id = %user_id,
            streak = step.streak,
            reward,
            protection_used = step.protection_used,
            reset = step.reset,
            "Daily reward claimed"
        );

        Ok(DailyClaimOutcome {
            reward,
            streak: step.streak,
            multiplier,
            milestone_bonus: bonus,
            protection_used: step.protection_used,
            streak_reset: step.reset,
            streak_protection: streak.streak_protection,
            next_claim_at: today + Duration::days(1),
        })
    }

    /// Replace current protection with `level`'s day count
    pub async fn purchase_protection(&self, user_id: &str, level: ProtectionLevel) -> Result<u32> {
        let _scope = self.locks.lock(user_scope(user_id)).await;
        let mut streak = self.streaks.get_or_default(user_id).await?;

        if streak.streak_protection >= level.days() {
            return Err(EconomyError::AlreadyProtected {
                current: streak.streak_protection,
            });
        }

        self.ledger
            .debit(user_id, level.price())
            .await
            .map_err(|e| {
                shortfall_as(e, |required, available| EconomyError::InsufficientCoins {
                    required,
                    available,
                })
            })?;

        streak.streak_protection = level.days();
        if let Err(err) = self.streaks.put(user_id, &streak).await {
            if let Err(refund_err) = self.ledger.credit(user_id, level.price()).await {
                error!(user_id = %user_id, error = %refund_err, "Protection refund failed");
            }
            return Err(err);
        }

        info!(
            user_id = %user_id,
            level = level.as_str(),
            days = level.days(),
            "Streak protection purchased"
        );
        Ok(streak.streak_protection)
    }

    pub async fn status(&self, user_id: &str) -> Result<DailyStatus> {
        let today = self.today();
        let streak = self.streaks.get_or_default(user_id).await?;
        let can_claim = !streak.last_claim_timestamp.is_some_and(|last| last >= today);

        let next_streak = if can_claim {
            streak.transition(today).streak
        } else {
            streak.current_streak
        };

        Ok(DailyStatus {
            can_claim,
            next_streak,
            next_reward: reward_for(next_streak),
            next_multiplier: multiplier(next_streak),
            next_milestone: next_milestone(streak.current_streak),
            next_claim_at: if can_claim {
                today
            } else {
                today + Duration::days(1)
            },
            streak,
        })
    }

    pub async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<DailyClaim>> {
        let mut entries = self.history.get_or_default(user_id).await?;
        entries.truncate(limit);
        Ok(entries)
    }

    /// Refresh `user_id`'s leaderboard row from their streak record.
    ///
    /// Not called by [`claim`](Self::claim); the claim route invokes it
    /// after a successful claim.
    pub async fn update_leaderboard(&self, user_id: &str) -> Result<()> {
        let streak = self.streaks.get_or_default(user_id).await?;
        let now = self.clock.now();
        self.leaderboard
            .update(LEADERBOARD_KEY, |entries| {
                entries.retain(|e| e.user_id != user_id);
                entries.push(LeaderboardEntry {
                    user_id: user_id.to_string(),
                    current_streak: streak.current_streak,
                    longest_streak: streak.longest_streak,
                    total_coins_earned: streak.total_coins_earned,
                    updated_at: now,
                });
                entries.sort_by(|a, b| {
                    b.current_streak
                        .cmp(&a.current_streak)
                        .then(b.longest_streak.cmp(&a.longest_streak))
                        .then(b.total_coins_earned.cmp(&a.total_coins_earned))
                });
                entries.truncate(LEADERBOARD_CAP);
                Ok(())
            })
            .await
    }

    pub async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        let mut entries = self.leaderboard.get_or_default(LEADERBOARD_KEY).await?;
        entries.truncate(limit.min(LEADERBOARD_CAP));
        Ok(entries)
    }
}

fn user_scope(user_id: &str) -> String {
    format!("daily:{user_id}")
}
