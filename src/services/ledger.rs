//! Coin ledger
//!
//! Balances live under `coins/<userId>`. A missing key reads as 0 and a
//! balance that reaches 0 is deleted rather than stored, so both legacy
//! representations stay equivalent.

use tracing::debug;

use crate::store::Table;
use crate::types::{EconomyError, Result};

pub const COINS_TABLE: &str = "coins";

pub struct LedgerService {
    coins: Table<i64>,
}

impl LedgerService {
    pub fn new(coins: Table<i64>) -> Self {
        Self { coins }
    }

    pub async fn balance(&self, user_id: &str) -> Result<i64> {
        Ok(self.coins.get(user_id).await?.unwrap_or(0).max(0))
    }

    /// Add coins, returning the new balance
    pub async fn credit(&self, user_id: &str, amount: i64) -> Result<i64> {
        ensure_positive(amount)?;
        let balance = self
            .coins
            .update_opt(user_id, |slot| {
                let next = slot
                    .unwrap_or(0)
                    .checked_add(amount)
                    .ok_or_else(|| EconomyError::Validation("Balance overflow".to_string()))?;
                *slot = stored(next);
                Ok(next)
            })
            .await?;
        debug!(user_id = %user_id, amount, balance, "Credited coins");
        Ok(balance)
    }

    /// Remove coins, failing without any change when the balance is short
    pub async fn debit(&self, user_id: &str, amount: i64) -> Result<i64> {
        ensure_positive(amount)?;
        let balance = self
            .coins
            .update_opt(user_id, |slot| {
                let available = slot.unwrap_or(0);
                if available < amount {
                    return Err(EconomyError::InsufficientFunds {
                        required: amount,
                        available,
                    });
                }
                let next = available - amount;
                *slot = stored(next);
                Ok(next)
            })
            .await?;
        debug!(user_id = %user_id, amount, balance, "Debited coins");
        Ok(balance)
    }

    pub async fn set_balance(&self, user_id: &str, amount: i64) -> Result<()> {
        if amount < 0 {
            return Err(EconomyError::Validation(
                "Balance cannot be negative".to_string(),
            ));
        }
        self.coins
            .update_opt(user_id, |slot| {
                *slot = stored(amount);
                Ok(())
            })
            .await
    }
}

fn ensure_positive(amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(EconomyError::Validation(format!(
            "Amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

/// Zero balances are not stored
fn stored(balance: i64) -> Option<i64> {
    (balance != 0).then_some(balance)
}

/// Re-label a ledger shortfall with the engine's own error kind
pub(crate) fn shortfall_as(
    err: EconomyError,
    relabel: impl FnOnce(i64, i64) -> EconomyError,
) -> EconomyError {
    match err {
        EconomyError::InsufficientFunds {
            required,
            available,
        } => relabel(required, available),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyLocks, KeyValueStore, MemoryStore};
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    fn ledger() -> (LedgerService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let table = Table::new(
            COINS_TABLE,
            Arc::clone(&store) as Arc<dyn KeyValueStore>,
            Arc::new(KeyLocks::new()),
        );
        (LedgerService::new(table), store)
    }

    #[tokio::test]
    async fn test_debit_rejects_overdraft_and_leaves_balance() {
        let (ledger, _) = ledger();
        ledger.credit("u1", 50).await.unwrap();

        let err = assert_err!(ledger.debit("u1", 60).await);
        assert!(matches!(
            err,
            EconomyError::InsufficientFunds { required: 60, available: 50 }
        ));
        assert_eq!(ledger.balance("u1").await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_zero_balance_is_deleted() {
        let (ledger, store) = ledger();
        ledger.credit("u1", 30).await.unwrap();
        assert_ok!(ledger.debit("u1", 30).await);
        assert!(!store.contains(COINS_TABLE, "u1"));
        assert_eq!(ledger.balance("u1").await.unwrap(), 0);

        ledger.set_balance("u1", 0).await.unwrap();
        assert!(!store.contains(COINS_TABLE, "u1"));
    }

    #[tokio::test]
    async fn test_stored_zero_reads_as_zero() {
        let (ledger, store) = ledger();
        store
            .set(COINS_TABLE, "u1", serde_json::json!(0))
            .await
            .unwrap();
        assert_eq!(ledger.balance("u1").await.unwrap(), 0);
        assert_err!(ledger.debit("u1", 1).await);
    }

    #[tokio::test]
    async fn test_non_positive_amounts_rejected() {
        let (ledger, _) = ledger();
        assert!(matches!(
            ledger.credit("u1", 0).await,
            Err(EconomyError::Validation(_))
        ));
        assert!(matches!(
            ledger.debit("u1", -5).await,
            Err(EconomyError::Validation(_))
        ));
        assert_err!(ledger.set_balance("u1", -1).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_debits_never_lose_updates() {
        let (ledger, _) = ledger();
        let ledger = Arc::new(ledger);
        ledger.credit("u1", 100).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..15 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move { ledger.debit("u1", 10).await }));
        }

        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }

        // Exactly ten debits fit; the rest must fail instead of overdrawing
        assert_eq!(ok, 10);
        assert_eq!(ledger.balance("u1").await.unwrap(), 0);
    }
}
