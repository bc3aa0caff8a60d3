//! Referral codes
//!
//! A user publishes a code; another user claims it once in their lifetime.
//! The claim pays both sides. The claimer's one-shot flag is checked and
//! set under the claimer's scope lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::clock::Clock;
use crate::services::ledger::LedgerService;
use crate::store::{KeyLocks, Table};
use crate::types::{EconomyError, Result};

pub const REFERRAL_CODES_TABLE: &str = "referral-codes";
pub const REFERRAL_CLAIMS_TABLE: &str = "referral-claims";

pub const OWNER_REWARD: i64 = 80;
pub const CLAIMER_REWARD: i64 = 250;
const MAX_CODE_LEN: usize = 15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralCode {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralClaim {
    pub code: String,
    pub reward: i64,
    pub balance: i64,
}

pub struct ReferralService {
    ledger: Arc<LedgerService>,
    codes: Table<ReferralCode>,
    claims: Table<i64>,
    locks: Arc<KeyLocks>,
    clock: Arc<dyn Clock>,
}

impl ReferralService {
    pub fn new(
        ledger: Arc<LedgerService>,
        codes: Table<ReferralCode>,
        claims: Table<i64>,
        locks: Arc<KeyLocks>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            codes,
            claims,
            locks,
            clock,
        }
    }

    pub async fn generate(&self, user_id: &str, code: &str) -> Result<ReferralCode> {
        validate_code(code)?;
        let record = ReferralCode {
            user_id: user_id.to_string(),
            created_at: self.clock.now(),
        };

        let stored = record.clone();
        self.codes
            .update_opt(code, |slot| {
                if slot.is_some() {
                    return Err(EconomyError::CodeTaken(code.to_string()));
                }
                *slot = Some(stored);
                Ok(())
            })
            .await?;

        info!(user_id = %user_id, code = %code, "Referral code created");
        Ok(record)
    }

    pub async fn claim(&self, user_id: &str, code: &str) -> Result<ReferralClaim> {
        let _scope = self.locks.lock(format!("referral-claim:{user_id}")).await;

        if self.claims.get(user_id).await?.is_some() {
            return Err(EconomyError::ReferralAlreadyClaimed);
        }
        let owner = self
            .codes
            .get(code)
            .await?
            .ok_or_else(|| EconomyError::ReferralCodeNotFound(code.to_string()))?;
        if owner.user_id == user_id {
            return Err(EconomyError::CannotClaimOwnCode);
        }

        // Flag first: a partial failure below must not allow a second claim
        self.claims.put(user_id, &1).await?;

        if let Err(err) = self.ledger.credit(&owner.user_id, OWNER_REWARD).await {
            error!(owner_id = %owner.user_id, code = %code, error = %err, "Referral owner reward failed");
        }
        let balance = self.ledger.credit(user_id, CLAIMER_REWARD).await?;

        info!(user_id = %user_id, owner_id = %owner.user_id, code = %code, "Referral claimed");
        Ok(ReferralClaim {
            code: code.to_string(),
            reward: CLAIMER_REWARD,
            balance,
        })
    }
}

fn validate_code(code: &str) -> Result<()> {
    if code.is_empty() {
        return Err(EconomyError::Validation("Referral code is required".to_string()));
    }
    if code.chars().count() > MAX_CODE_LEN {
        return Err(EconomyError::Validation(format!(
            "Referral code must be at most {MAX_CODE_LEN} characters"
        )));
    }
    if code.chars().any(char::is_whitespace) {
        return Err(EconomyError::Validation(
            "Referral code cannot contain spaces".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::harness;
    use tokio_test::assert_err;

    #[test]
    fn test_code_rules() {
        assert!(validate_code("FRIEND2026").is_ok());
        assert!(validate_code("").is_err());
        assert!(validate_code("has space").is_err());
        assert!(validate_code("sixteen-chars-xx").is_err());
    }

    #[tokio::test]
    async fn test_claim_pays_both_once() {
        let h = harness();
        h.economy.referrals.generate("owner", "WELCOME").await.unwrap();
        h.economy.referrals.generate("other", "SECOND").await.unwrap();

        let err = assert_err!(h.economy.referrals.generate("u9", "WELCOME").await);
        assert!(matches!(err, EconomyError::CodeTaken(_)));

        let claim = h.economy.referrals.claim("u1", "WELCOME").await.unwrap();
        assert_eq!(claim.balance, 250);
        assert_eq!(h.economy.ledger.balance("owner").await.unwrap(), 80);

        // Lifetime one-shot, even with a different code
        let err = assert_err!(h.economy.referrals.claim("u1", "SECOND").await);
        assert!(matches!(err, EconomyError::ReferralAlreadyClaimed));
        assert_eq!(h.economy.ledger.balance("u1").await.unwrap(), 250);
        assert_eq!(h.economy.ledger.balance("other").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cannot_claim_own_or_missing_code() {
        let h = harness();
        h.economy.referrals.generate("u1", "MINE").await.unwrap();

        let err = assert_err!(h.economy.referrals.claim("u1", "MINE").await);
        assert!(matches!(err, EconomyError::CannotClaimOwnCode));

        let err = assert_err!(h.economy.referrals.claim("u1", "NOPE").await);
        assert!(matches!(err, EconomyError::ReferralCodeNotFound(_)));

        // Failed attempts do not burn the one-shot
        h.economy.referrals.generate("u2", "THEIRS").await.unwrap();
        h.economy.referrals.claim("u1", "THEIRS").await.unwrap();
    }
}
