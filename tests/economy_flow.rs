//! Cross-engine flows over in-memory collaborators and a manual clock

use chrono::{Duration, FixedOffset, TimeZone, Utc};
use std::sync::Arc;
use tokio_test::assert_err;

use panel_economy::catalog::{BoostDuration, BoostType, PlanId, ProtectionLevel, ResourceKind};
use panel_economy::clock::ManualClock;
use panel_economy::config::EconomyConfig;
use panel_economy::models::{ResourceGrant, ServerLimits};
use panel_economy::panel::{MemoryPanel, PanelClient};
use panel_economy::payments::{MemoryPayments, PaymentProcessor};
use panel_economy::services::{Economy, EconomyDeps, TickerIntervals};
use panel_economy::store::{KeyValueStore, MemoryStore};
use panel_economy::EconomyError;

struct World {
    economy: Economy,
    panel: Arc<MemoryPanel>,
    clock: ManualClock,
}

fn world() -> World {
    let panel = Arc::new(MemoryPanel::new());
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap());
    let economy = Economy::new(EconomyDeps {
        store: Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>,
        panel: Arc::clone(&panel) as Arc<dyn PanelClient>,
        payments: Arc::new(MemoryPayments::new()) as Arc<dyn PaymentProcessor>,
        clock: Arc::new(clock.clone()),
        config: Arc::new(EconomyConfig::default()),
        day_offset: FixedOffset::east_opt(0).unwrap(),
    });
    World {
        economy,
        panel,
        clock,
    }
}

#[tokio::test]
async fn cpu_boost_applies_and_ticker_reverts_it() {
    let w = world();
    w.panel.add_server("srv-1", "alice", ServerLimits::new(1024, 4096, 100));
    w.economy.ledger.credit("alice", 500).await.unwrap();

    let boost = w
        .economy
        .boosts
        .apply("alice", "srv-1", BoostType::Cpu, BoostDuration::OneHour)
        .await
        .unwrap();
    assert_eq!(boost.applied_change.cpu, 200);
    assert_eq!(w.panel.server("srv-1").unwrap().limits.cpu, 300);
    assert_eq!(w.economy.ledger.balance("alice").await.unwrap(), 400);

    // Boosted usage is covered by the boost allowance
    let outcome = w.economy.reconciler.reconcile("alice").await.unwrap();
    assert!(!outcome.suspend);

    let tickers = w.economy.tickers(TickerIntervals::default());
    w.clock.advance(Duration::hours(1));
    tickers.run_once().await;

    assert_eq!(
        w.panel.server("srv-1").unwrap().limits,
        ServerLimits::new(1024, 4096, 100)
    );
    assert!(w.economy.boosts.active("alice").await.unwrap().is_empty());

    let patches = w.panel.patch_calls();
    tickers.run_once().await;
    assert_eq!(w.panel.patch_calls(), patches);
}

#[tokio::test]
async fn boost_type_is_unique_per_server_across_users() {
    let w = world();
    w.panel.add_server("srv-1", "alice", ServerLimits::new(1024, 4096, 100));
    w.economy.ledger.credit("alice", 1000).await.unwrap();

    w.economy
        .boosts
        .apply("alice", "srv-1", BoostType::Ram, BoostDuration::SixHours)
        .await
        .unwrap();
    let err = assert_err!(
        w.economy
            .boosts
            .apply("alice", "srv-1", BoostType::Ram, BoostDuration::OneHour)
            .await
    );
    assert!(matches!(err, EconomyError::BoostAlreadyActive { .. }));

    // A different type stacks
    w.economy
        .boosts
        .apply("alice", "srv-1", BoostType::Disk, BoostDuration::OneHour)
        .await
        .unwrap();
    assert_eq!(w.economy.boosts.active("alice").await.unwrap().len(), 2);
}

#[tokio::test]
async fn stake_checks_minimum_then_balance() {
    let w = world();
    w.economy.ledger.credit("bob", 500).await.unwrap();

    let err = assert_err!(w.economy.staking.create("bob", PlanId::Silver, 300).await);
    assert!(matches!(err, EconomyError::InsufficientAmount { minimum: 500, .. }));

    let err = assert_err!(w.economy.staking.create("bob", PlanId::Silver, 600).await);
    assert!(matches!(
        err,
        EconomyError::InsufficientBalance { required: 600, available: 500 }
    ));
    assert_eq!(w.economy.ledger.balance("bob").await.unwrap(), 500);
}

#[tokio::test]
async fn gold_stake_claimed_one_ms_early_pays_forty_percent_penalty() {
    let w = world();
    w.economy.ledger.credit("bob", 2000).await.unwrap();
    let stake = w.economy.staking.create("bob", PlanId::Gold, 2000).await.unwrap();
    let end = stake.end_time.unwrap();

    w.clock.set(end - Duration::milliseconds(1));
    let outcome = w.economy.staking.claim("bob", &stake.id).await.unwrap();
    assert!(outcome.early);
    assert_eq!(outcome.penalty, 800.0);
    assert_eq!(outcome.payout, 1200);
    assert_eq!(w.economy.ledger.balance("bob").await.unwrap(), 1200);

    let err = assert_err!(w.economy.staking.claim("bob", &stake.id).await);
    assert!(matches!(err, EconomyError::StakeNotActive(_)));
}

#[tokio::test]
async fn daily_streak_survives_gap_only_with_protection() {
    let w = world();
    let daily = &w.economy.daily;

    assert_eq!(daily.claim("carol").await.unwrap().streak, 1);
    w.clock.advance(Duration::days(1));
    assert_eq!(daily.claim("carol").await.unwrap().streak, 2);

    w.clock.advance(Duration::days(3));
    let outcome = daily.claim("carol").await.unwrap();
    assert_eq!(outcome.streak, 1);
    assert!(outcome.streak_reset);

    w.economy.ledger.credit("carol", 250).await.unwrap();
    assert_eq!(
        daily.purchase_protection("carol", ProtectionLevel::Silver).await.unwrap(),
        3
    );

    w.clock.advance(Duration::days(3));
    let outcome = daily.claim("carol").await.unwrap();
    assert_eq!(outcome.streak, 2);
    assert!(outcome.protection_used);
    assert_eq!(outcome.streak_protection, 2);
}

#[tokio::test]
async fn referral_is_once_per_lifetime() {
    let w = world();
    w.economy.referrals.generate("dave", "DAVE10").await.unwrap();
    w.economy.referrals.generate("erin", "ERIN10").await.unwrap();

    w.economy.referrals.claim("frank", "DAVE10").await.unwrap();
    let err = assert_err!(w.economy.referrals.claim("frank", "ERIN10").await);
    assert!(matches!(err, EconomyError::ReferralAlreadyClaimed));

    assert_eq!(w.economy.ledger.balance("dave").await.unwrap(), 80);
    assert_eq!(w.economy.ledger.balance("erin").await.unwrap(), 0);
    assert_eq!(w.economy.ledger.balance("frank").await.unwrap(), 250);
}

#[tokio::test]
async fn shrinking_grant_suspends_and_store_purchase_lifts_it() {
    let w = world();
    w.panel.add_server("srv-9", "gina", ServerLimits::new(3072, 4096, 150));
    w.economy
        .admin
        .set_resources("gina", ResourceGrant::new(0, 0, 100, 0))
        .await
        .unwrap();

    let change = w
        .economy
        .admin
        .set_resources("gina", ResourceGrant::default())
        .await
        .unwrap();
    assert!(change.reconcile.is_some_and(|r| !r.suspend));

    // Over on CPU once the extra grant shrinks below usage
    w.panel.add_server("srv-10", "gina", ServerLimits::new(0, 0, 100));
    let outcome = w.economy.reconciler.reconcile("gina").await.unwrap();
    assert!(outcome.suspend);
    assert!(w.panel.server("srv-9").unwrap().suspended);

    w.economy.ledger.credit("gina", 400).await.unwrap();
    let purchase = w
        .economy
        .resource_store
        .buy("gina", ResourceKind::Cpu, 1)
        .await
        .unwrap();
    assert!(purchase.reconcile.is_some_and(|r| !r.suspend));
    assert!(!w.panel.server("srv-9").unwrap().suspended);
    assert!(!w.panel.server("srv-10").unwrap().suspended);
}

#[tokio::test]
async fn concurrent_spending_never_overdraws() {
    let w = world();
    w.economy.ledger.credit("hank", 100).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..25 {
        let ledger = Arc::clone(&w.economy.ledger);
        handles.push(tokio::spawn(async move { ledger.debit("hank", 10).await }));
    }
    let mut ok = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            ok += 1;
        }
    }
    assert_eq!(ok, 10);
    assert_eq!(w.economy.ledger.balance("hank").await.unwrap(), 0);
}
