//! Background passes
//!
//! Each periodic job is a [`Ticker`] owned by the composition root with an
//! explicit `start`/`stop`. The job itself is a [`TickJob`] whose
//! `run_once` tests call directly instead of waiting on a timer.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::services::boosts::BoostEngine;
use crate::services::staking::StakingEngine;
use crate::types::Result;

#[async_trait]
pub trait TickJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run_once(&self) -> Result<()>;
}

/// Ticker timing
#[derive(Debug, Clone, Copy)]
pub struct TickerConfig {
    pub interval: Duration,
    /// Wait before the first pass; zero runs one pass immediately
    pub initial_delay: Duration,
}

impl TickerConfig {
    pub fn eager(interval: Duration) -> Self {
        Self {
            interval,
            initial_delay: Duration::ZERO,
        }
    }

    pub fn delayed(interval: Duration, initial_delay: Duration) -> Self {
        Self {
            interval,
            initial_delay,
        }
    }
}

struct Running {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct Ticker {
    config: TickerConfig,
    job: Arc<dyn TickJob>,
    running: Mutex<Option<Running>>,
}

impl Ticker {
    pub fn new(config: TickerConfig, job: Arc<dyn TickJob>) -> Self {
        Self {
            config,
            job,
            running: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.job.name()
    }

    /// Spawn the loop; a second call while running does nothing
    pub fn start(&self) {
        let Ok(mut running) = self.running.lock() else {
            return;
        };
        if running.is_some() {
            return;
        }

        info!(
            job = self.job.name(),
            interval_secs = self.config.interval.as_secs(),
            initial_delay_secs = self.config.initial_delay.as_secs(),
            "Starting ticker"
        );

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(run_loop(Arc::clone(&self.job), self.config, shutdown_rx));
        *running = Some(Running {
            shutdown_tx,
            handle,
        });
    }

    /// Signal the loop and wait for an in-flight pass to finish
    pub async fn stop(&self) {
        let running = self.running.lock().ok().and_then(|mut r| r.take());
        if let Some(running) = running {
            info!(job = self.job.name(), "Stopping ticker");
            let _ = running.shutdown_tx.send(()).await;
            if let Err(e) = running.handle.await {
                warn!(job = self.job.name(), error = %e, "Ticker task ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().map(|r| r.is_some()).unwrap_or(false)
    }

    pub async fn run_once(&self) -> Result<()> {
        self.job.run_once().await
    }
}

async fn run_loop(job: Arc<dyn TickJob>, config: TickerConfig, mut shutdown_rx: mpsc::Receiver<()>) {
    if !config.initial_delay.is_zero() {
        tokio::select! {
            _ = tokio::time::sleep(config.initial_delay) => {}
            _ = shutdown_rx.recv() => return,
        }
    }

    let mut interval = tokio::time::interval_at(Instant::now(), config.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                debug!(job = job.name(), "Ticker pass");
                if let Err(e) = job.run_once().await {
                    warn!(job = job.name(), error = %e, "Ticker pass failed");
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }
    debug!(job = job.name(), "Ticker loop exited");
}

// =============================================================================
// Jobs
// =============================================================================

pub struct BoostSweepJob(pub Arc<BoostEngine>);

#[async_trait]
impl TickJob for BoostSweepJob {
    fn name(&self) -> &'static str {
        "boost-expiry-sweep"
    }

    async fn run_once(&self) -> Result<()> {
        self.0.sweep_expired().await.map(|_| ())
    }
}

pub struct ScheduledBoostJob(pub Arc<BoostEngine>);

#[async_trait]
impl TickJob for ScheduledBoostJob {
    fn name(&self) -> &'static str {
        "scheduled-boost-dispatch"
    }

    async fn run_once(&self) -> Result<()> {
        self.0.dispatch_scheduled().await.map(|_| ())
    }
}

pub struct StakingAccrualJob(pub Arc<StakingEngine>);

#[async_trait]
impl TickJob for StakingAccrualJob {
    fn name(&self) -> &'static str {
        "staking-accrual"
    }

    async fn run_once(&self) -> Result<()> {
        self.0.accrue_daily().await.map(|_| ())
    }
}

/// Intervals for the three background passes
#[derive(Debug, Clone, Copy)]
pub struct TickerIntervals {
    pub boost_sweep: Duration,
    pub schedule_dispatch: Duration,
    pub schedule_dispatch_delay: Duration,
    pub staking_accrual: Duration,
}

impl Default for TickerIntervals {
    fn default() -> Self {
        Self {
            boost_sweep: Duration::from_secs(60),
            schedule_dispatch: Duration::from_secs(30),
            schedule_dispatch_delay: Duration::from_secs(10),
            staking_accrual: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// All background passes of the economy
pub struct EconomyTickers {
    tickers: Vec<Ticker>,
}

impl EconomyTickers {
    pub fn new(boosts: Arc<BoostEngine>, staking: Arc<StakingEngine>, intervals: TickerIntervals) -> Self {
        let tickers = vec![
            Ticker::new(
                TickerConfig::eager(intervals.boost_sweep),
                Arc::new(BoostSweepJob(Arc::clone(&boosts))),
            ),
            Ticker::new(
                TickerConfig::delayed(intervals.schedule_dispatch, intervals.schedule_dispatch_delay),
                Arc::new(ScheduledBoostJob(boosts)),
            ),
            Ticker::new(
                TickerConfig::eager(intervals.staking_accrual),
                Arc::new(StakingAccrualJob(staking)),
            ),
        ];
        Self { tickers }
    }

    pub fn start(&self) {
        for ticker in &self.tickers {
            ticker.start();
        }
    }

    pub async fn stop(&self) {
        for ticker in &self.tickers {
            ticker.stop().await;
        }
    }

    /// One pass of every job, in order
    pub async fn run_once(&self) {
        for ticker in &self.tickers {
            if let Err(e) = ticker.run_once().await {
                warn!(job = ticker.name(), error = %e, "Ticker pass failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    #[async_trait]
    impl TickJob for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        async fn run_once(&self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_eager_ticker_runs_immediately_and_stops() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let ticker = Ticker::new(
            TickerConfig::eager(Duration::from_millis(20)),
            Arc::clone(&counter) as Arc<dyn TickJob>,
        );

        ticker.start();
        ticker.start();
        assert!(ticker.is_running());
        tokio::time::sleep(Duration::from_millis(70)).await;
        ticker.stop().await;
        assert!(!ticker.is_running());

        let runs = counter.0.load(Ordering::SeqCst);
        assert!(runs >= 2, "expected several passes, got {runs}");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), runs);
    }

    #[tokio::test]
    async fn test_delayed_ticker_waits() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let ticker = Ticker::new(
            TickerConfig::delayed(Duration::from_millis(10), Duration::from_secs(60)),
            Arc::clone(&counter) as Arc<dyn TickJob>,
        );
        ticker.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        ticker.stop().await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);

        ticker.run_once().await.unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
