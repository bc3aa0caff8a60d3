//! Configuration for the economy service
//!
//! CLI arguments and environment variable handling using clap, plus an
//! optional TOML file for packages and legacy resource-store prices.

use chrono::FixedOffset;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::auth::JwtValidator;
use crate::catalog::ResourceKind;
use crate::models::ResourceGrant;
use crate::services::TickerIntervals;
use crate::types::{EconomyError, Result};

/// Coin economy and resource entitlement service for a Pterodactyl dashboard
#[derive(Parser, Debug, Clone)]
#[command(name = "panel-economy")]
#[command(about = "Coin economy, boosts, staking and billing in front of a Pterodactyl panel")]
pub struct Args {
    /// Unique identifier for this instance (shows up in logs)
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory panel and payments, X-User-Id auth)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// JWT secret for session token validation (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Persistence backend
    #[arg(long, env = "STORE_BACKEND", value_enum, default_value = "mongo")]
    pub store_backend: StoreBackend,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "panel_economy")]
    pub mongodb_db: String,

    /// Timeout for a single store operation in milliseconds
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value = "5000")]
    pub store_timeout_ms: u64,

    /// Pterodactyl panel base URL (e.g. "https://panel.example.com")
    #[arg(long, env = "PANEL_URL")]
    pub panel_url: Option<String>,

    /// Pterodactyl application API key
    #[arg(long, env = "PANEL_API_KEY")]
    pub panel_api_key: Option<String>,

    /// Timeout for panel and payment HTTP calls in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Stripe secret key
    #[arg(long, env = "STRIPE_SECRET_KEY")]
    pub stripe_secret_key: Option<String>,

    /// Redirect after a successful checkout ({CHECKOUT_SESSION_ID} is substituted by Stripe)
    #[arg(
        long,
        env = "CHECKOUT_SUCCESS_URL",
        default_value = "http://localhost:3000/billing?session_id={CHECKOUT_SESSION_ID}"
    )]
    pub checkout_success_url: String,

    /// Redirect after an abandoned checkout
    #[arg(long, env = "CHECKOUT_CANCEL_URL", default_value = "http://localhost:3000/billing")]
    pub checkout_cancel_url: String,

    /// Offset from UTC in minutes that defines "midnight" for daily rewards
    #[arg(long, env = "DAY_BOUNDARY_OFFSET_MINUTES", default_value = "0", allow_hyphen_values = true)]
    pub day_boundary_offset_minutes: i32,

    /// Boost expiry sweep interval in seconds
    #[arg(long, env = "BOOST_SWEEP_INTERVAL_SECS", default_value = "60")]
    pub boost_sweep_interval_secs: u64,

    /// Scheduled boost dispatch interval in seconds
    #[arg(long, env = "SCHEDULE_DISPATCH_INTERVAL_SECS", default_value = "30")]
    pub schedule_dispatch_interval_secs: u64,

    /// Delay before the first scheduled boost dispatch in seconds
    #[arg(long, env = "SCHEDULE_DISPATCH_DELAY_SECS", default_value = "10")]
    pub schedule_dispatch_delay_secs: u64,

    /// Staking accrual interval in seconds
    #[arg(long, env = "STAKING_ACCRUAL_INTERVAL_SECS", default_value = "86400")]
    pub staking_accrual_interval_secs: u64,

    /// Package assigned to users without an explicit one
    #[arg(long, env = "DEFAULT_PACKAGE", default_value = "default")]
    pub default_package: String,

    /// TOML file with packages and resource store prices
    #[arg(long, env = "ECONOMY_CONFIG")]
    pub economy_config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    Memory,
    Mongo,
}

impl Args {
    /// Check for configurations that cannot work outside dev mode
    pub fn validate(&self) -> Result<()> {
        if self.dev_mode {
            return Ok(());
        }
        if self.jwt_secret.is_none() {
            return Err(EconomyError::Config(
                "JWT_SECRET is required in production mode".to_string(),
            ));
        }
        if self.panel_url.is_none() || self.panel_api_key.is_none() {
            return Err(EconomyError::Config(
                "PANEL_URL and PANEL_API_KEY are required in production mode".to_string(),
            ));
        }
        if self.stripe_secret_key.is_none() {
            return Err(EconomyError::Config(
                "STRIPE_SECRET_KEY is required in production mode".to_string(),
            ));
        }
        if self.store_backend == StoreBackend::Memory {
            return Err(EconomyError::Config(
                "The memory store backend is only allowed in dev mode".to_string(),
            ));
        }
        Ok(())
    }

    /// Token validator (fixed secret in dev mode when none is set)
    pub fn jwt_validator(&self) -> Result<JwtValidator> {
        match &self.jwt_secret {
            Some(secret) => JwtValidator::new(secret.clone(), 3600),
            None if self.dev_mode => Ok(JwtValidator::new_dev()),
            None => Err(EconomyError::Config(
                "JWT_SECRET is required in production mode".to_string(),
            )),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// UTC offset at which the daily-reward day rolls over
    pub fn day_offset(&self) -> Result<FixedOffset> {
        self.day_boundary_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                EconomyError::Config(format!(
                    "Invalid day boundary offset: {} minutes",
                    self.day_boundary_offset_minutes
                ))
            })
    }

    pub fn ticker_intervals(&self) -> Result<TickerIntervals> {
        let intervals = TickerIntervals {
            boost_sweep: Duration::from_secs(self.boost_sweep_interval_secs),
            schedule_dispatch: Duration::from_secs(self.schedule_dispatch_interval_secs),
            schedule_dispatch_delay: Duration::from_secs(self.schedule_dispatch_delay_secs),
            staking_accrual: Duration::from_secs(self.staking_accrual_interval_secs),
        };
        if intervals.boost_sweep.is_zero()
            || intervals.schedule_dispatch.is_zero()
            || intervals.staking_accrual.is_zero()
        {
            return Err(EconomyError::Config(
                "Ticker intervals must be positive".to_string(),
            ));
        }
        Ok(intervals)
    }

    /// Load the economy config file, or built-in defaults when none is set
    pub fn load_economy_config(&self) -> Result<EconomyConfig> {
        let mut config = match &self.economy_config {
            Some(path) => EconomyConfig::from_file(path)?,
            None => EconomyConfig::default(),
        };
        config.default_package = self.default_package.clone();
        config.validate()?;
        Ok(config)
    }
}

/// Unit size and coin price for one legacy store resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct UnitPrice {
    /// Amount of the resource one unit adds
    pub per: i64,
    /// Coins charged per unit
    pub cost: i64,
}

/// Packages and store prices
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    /// Package used when a user has none assigned
    #[serde(skip)]
    pub default_package: String,
    pub packages: HashMap<String, ResourceGrant>,
    pub store: HashMap<ResourceKind, UnitPrice>,
    /// Max units per legacy store purchase
    pub max_units_per_purchase: i64,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        let mut packages = HashMap::new();
        packages.insert("default".to_string(), ResourceGrant::new(3072, 10240, 150, 2));

        let mut store = HashMap::new();
        store.insert(ResourceKind::Ram, UnitPrice { per: 1024, cost: 300 });
        store.insert(ResourceKind::Disk, UnitPrice { per: 5120, cost: 150 });
        store.insert(ResourceKind::Cpu, UnitPrice { per: 100, cost: 400 });
        store.insert(ResourceKind::Servers, UnitPrice { per: 1, cost: 500 });

        Self {
            default_package: "default".to_string(),
            packages,
            store,
            max_units_per_purchase: 10,
        }
    }
}

impl EconomyConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let parsed: EconomyConfig = toml::from_str(raw)
            .map_err(|e| EconomyError::Config(format!("Invalid economy config: {e}")))?;
        // Missing store prices fall back to the built-in table
        let mut config = Self::default();
        if !parsed.packages.is_empty() {
            config.packages = parsed.packages;
        }
        config.store.extend(parsed.store);
        config.max_units_per_purchase = parsed.max_units_per_purchase;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.packages.contains_key(&self.default_package) {
            return Err(EconomyError::Config(format!(
                "Default package '{}' is not defined",
                self.default_package
            )));
        }
        if let Some((name, _)) = self.packages.iter().find(|(_, p)| !p.is_non_negative()) {
            return Err(EconomyError::Config(format!(
                "Package '{name}' has negative resources"
            )));
        }
        if self.store.values().any(|p| p.per <= 0 || p.cost <= 0) {
            return Err(EconomyError::Config(
                "Store unit sizes and costs must be positive".to_string(),
            ));
        }
        if self.max_units_per_purchase <= 0 {
            return Err(EconomyError::Config(
                "max_units_per_purchase must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Package envelope by name, falling back to the default package
    pub fn package(&self, name: Option<&str>) -> ResourceGrant {
        name.and_then(|n| self.packages.get(n))
            .or_else(|| self.packages.get(&self.default_package))
            .copied()
            .unwrap_or_default()
    }
}
