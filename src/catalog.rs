//! Static product tables
//!
//! Boost types, staking plans, streak protection tiers and the billing
//! catalog are closed enums with a fixed lookup table. Strings from clients
//! are parsed into these enums at the route boundary, so engines never see
//! an unknown key.

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::models::{ResourceGrant, ServerLimits};
use crate::types::EconomyError;

// =============================================================================
// Boosts
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoostType {
    Ram,
    Cpu,
    Disk,
    Performance,
    Extreme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BoostDuration {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "24h")]
    OneDay,
}

/// Per-resource multiplier; 1.0 leaves the resource untouched
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Multipliers {
    pub memory: f64,
    pub cpu: f64,
    pub disk: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoostSpec {
    pub id: BoostType,
    pub name: &'static str,
    pub description: &'static str,
    pub multipliers: Multipliers,
    #[serde(serialize_with = "prices_as_map")]
    pub prices: [(BoostDuration, i64); 4],
}

/// `{"1h": 100, "6h": 450, ...}` on the wire
fn prices_as_map<S: Serializer>(prices: &[(BoostDuration, i64); 4], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_map(prices.iter().map(|(d, p)| (d.as_str(), *p)))
}

static RAM_BOOST: BoostSpec = BoostSpec {
    id: BoostType::Ram,
    name: "RAM Boost",
    description: "Doubles the memory limit of a server",
    multipliers: Multipliers { memory: 2.0, cpu: 1.0, disk: 1.0 },
    prices: [
        (BoostDuration::OneHour, 75),
        (BoostDuration::SixHours, 300),
        (BoostDuration::TwelveHours, 500),
        (BoostDuration::OneDay, 900),
    ],
};

static CPU_BOOST: BoostSpec = BoostSpec {
    id: BoostType::Cpu,
    name: "CPU Boost",
    description: "Triples the CPU limit of a server",
    multipliers: Multipliers { memory: 1.0, cpu: 3.0, disk: 1.0 },
    prices: [
        (BoostDuration::OneHour, 100),
        (BoostDuration::SixHours, 450),
        (BoostDuration::TwelveHours, 800),
        (BoostDuration::OneDay, 1400),
    ],
};

static DISK_BOOST: BoostSpec = BoostSpec {
    id: BoostType::Disk,
    name: "Disk Boost",
    description: "Doubles the disk limit of a server",
    multipliers: Multipliers { memory: 1.0, cpu: 1.0, disk: 2.0 },
    prices: [
        (BoostDuration::OneHour, 50),
        (BoostDuration::SixHours, 200),
        (BoostDuration::TwelveHours, 350),
        (BoostDuration::OneDay, 600),
    ],
};

static PERFORMANCE_BOOST: BoostSpec = BoostSpec {
    id: BoostType::Performance,
    name: "Performance Boost",
    description: "Raises memory and CPU by half",
    multipliers: Multipliers { memory: 1.5, cpu: 1.5, disk: 1.0 },
    prices: [
        (BoostDuration::OneHour, 150),
        (BoostDuration::SixHours, 650),
        (BoostDuration::TwelveHours, 1100),
        (BoostDuration::OneDay, 2000),
    ],
};

static EXTREME_BOOST: BoostSpec = BoostSpec {
    id: BoostType::Extreme,
    name: "Extreme Boost",
    description: "Doubles memory and CPU, adds half again of disk",
    multipliers: Multipliers { memory: 2.0, cpu: 2.0, disk: 1.5 },
    prices: [
        (BoostDuration::OneHour, 250),
        (BoostDuration::SixHours, 1100),
        (BoostDuration::TwelveHours, 2000),
        (BoostDuration::OneDay, 3600),
    ],
};

impl BoostType {
    pub const ALL: [BoostType; 5] = [
        BoostType::Ram,
        BoostType::Cpu,
        BoostType::Disk,
        BoostType::Performance,
        BoostType::Extreme,
    ];

    pub fn spec(self) -> &'static BoostSpec {
        match self {
            BoostType::Ram => &RAM_BOOST,
            BoostType::Cpu => &CPU_BOOST,
            BoostType::Disk => &DISK_BOOST,
            BoostType::Performance => &PERFORMANCE_BOOST,
            BoostType::Extreme => &EXTREME_BOOST,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BoostType::Ram => "ram",
            BoostType::Cpu => "cpu",
            BoostType::Disk => "disk",
            BoostType::Performance => "performance",
            BoostType::Extreme => "extreme",
        }
    }

    /// Coin price for a duration tier
    pub fn price(self, duration: BoostDuration) -> i64 {
        self.spec()
            .prices
            .iter()
            .find(|(d, _)| *d == duration)
            .map(|(_, p)| *p)
            .unwrap_or(0)
    }

    /// `floor(limit * multiplier) - limit` for every resource
    pub fn applied_change(self, limits: &ServerLimits) -> ServerLimits {
        let m = self.spec().multipliers;
        ServerLimits {
            memory: scaled_delta(limits.memory, m.memory),
            cpu: scaled_delta(limits.cpu, m.cpu),
            disk: scaled_delta(limits.disk, m.disk),
        }
    }
}

fn scaled_delta(limit: i64, multiplier: f64) -> i64 {
    (limit as f64 * multiplier).floor() as i64 - limit
}

impl fmt::Display for BoostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BoostType {
    type Err = EconomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BoostType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| EconomyError::Validation(format!("Invalid boost type: {s}")))
    }
}

impl BoostDuration {
    pub const ALL: [BoostDuration; 4] = [
        BoostDuration::OneHour,
        BoostDuration::SixHours,
        BoostDuration::TwelveHours,
        BoostDuration::OneDay,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BoostDuration::OneHour => "1h",
            BoostDuration::SixHours => "6h",
            BoostDuration::TwelveHours => "12h",
            BoostDuration::OneDay => "24h",
        }
    }

    pub fn as_duration(self) -> Duration {
        match self {
            BoostDuration::OneHour => Duration::hours(1),
            BoostDuration::SixHours => Duration::hours(6),
            BoostDuration::TwelveHours => Duration::hours(12),
            BoostDuration::OneDay => Duration::hours(24),
        }
    }

    pub fn as_millis(self) -> i64 {
        self.as_duration().num_milliseconds()
    }
}

impl fmt::Display for BoostDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BoostDuration {
    type Err = EconomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BoostDuration::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| EconomyError::Validation(format!("Invalid boost duration: {s}")))
    }
}

// =============================================================================
// Staking
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanId {
    Flexible,
    Bronze,
    Silver,
    Gold,
    Platinum,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StakingPlan {
    pub id: PlanId,
    pub name: &'static str,
    /// Annual percentage yield, e.g. `12.0` for 12%
    pub apy: f64,
    /// Lock period in days; 0 means withdraw any time
    pub min_duration_days: i64,
    pub penalty_percent: f64,
    pub min_amount: i64,
}

static STAKING_PLANS: [StakingPlan; 5] = [
    StakingPlan {
        id: PlanId::Flexible,
        name: "Flexible",
        apy: 5.0,
        min_duration_days: 0,
        penalty_percent: 0.0,
        min_amount: 100,
    },
    StakingPlan {
        id: PlanId::Bronze,
        name: "Bronze",
        apy: 8.0,
        min_duration_days: 7,
        penalty_percent: 10.0,
        min_amount: 250,
    },
    StakingPlan {
        id: PlanId::Silver,
        name: "Silver",
        apy: 12.0,
        min_duration_days: 30,
        penalty_percent: 25.0,
        min_amount: 500,
    },
    StakingPlan {
        id: PlanId::Gold,
        name: "Gold",
        apy: 18.0,
        min_duration_days: 90,
        penalty_percent: 40.0,
        min_amount: 1000,
    },
    StakingPlan {
        id: PlanId::Platinum,
        name: "Platinum",
        apy: 25.0,
        min_duration_days: 180,
        penalty_percent: 50.0,
        min_amount: 5000,
    },
];

impl PlanId {
    pub const ALL: [PlanId; 5] = [
        PlanId::Flexible,
        PlanId::Bronze,
        PlanId::Silver,
        PlanId::Gold,
        PlanId::Platinum,
    ];

    pub fn plan(self) -> &'static StakingPlan {
        &STAKING_PLANS[self as usize]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlanId::Flexible => "flexible",
            PlanId::Bronze => "bronze",
            PlanId::Silver => "silver",
            PlanId::Gold => "gold",
            PlanId::Platinum => "platinum",
        }
    }
}

impl StakingPlan {
    pub fn all() -> &'static [StakingPlan] {
        &STAKING_PLANS
    }

    /// `None` for plans without a lock period
    pub fn min_duration(&self) -> Option<Duration> {
        (self.min_duration_days > 0).then(|| Duration::days(self.min_duration_days))
    }

    /// Reward for one day on `amount`
    pub fn daily_reward(&self, amount: i64) -> f64 {
        amount as f64 * (self.apy / 365.0 / 100.0)
    }

    /// Early-withdrawal penalty, charged on principal only
    pub fn early_penalty(&self, amount: i64) -> f64 {
        amount as f64 * (self.penalty_percent / 100.0)
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanId {
    type Err = EconomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlanId::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| EconomyError::Validation(format!("Invalid staking plan: {s}")))
    }
}

// =============================================================================
// Streak protection
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionLevel {
    Bronze,
    Silver,
    Gold,
}

impl ProtectionLevel {
    pub const ALL: [ProtectionLevel; 3] = [
        ProtectionLevel::Bronze,
        ProtectionLevel::Silver,
        ProtectionLevel::Gold,
    ];

    pub fn days(self) -> u32 {
        match self {
            ProtectionLevel::Bronze => 1,
            ProtectionLevel::Silver => 3,
            ProtectionLevel::Gold => 7,
        }
    }

    pub fn price(self) -> i64 {
        match self {
            ProtectionLevel::Bronze => 100,
            ProtectionLevel::Silver => 250,
            ProtectionLevel::Gold => 500,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProtectionLevel::Bronze => "bronze",
            ProtectionLevel::Silver => "silver",
            ProtectionLevel::Gold => "gold",
        }
    }
}

impl FromStr for ProtectionLevel {
    type Err = EconomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProtectionLevel::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| EconomyError::Validation(format!("Invalid protection level: {s}")))
    }
}

// =============================================================================
// Billing catalog
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinPackage {
    pub id: &'static str,
    pub coins: i64,
    #[serde(skip)]
    pub price_cents: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub id: &'static str,
    pub name: &'static str,
    #[serde(skip)]
    pub price_cents: i64,
    pub coins: i64,
    pub resources: ResourceGrant,
}

pub static COIN_PURCHASE_OPTIONS: [CoinPackage; 4] = [
    CoinPackage { id: "coins_1000", coins: 1000, price_cents: 200 },
    CoinPackage { id: "coins_5000", coins: 5000, price_cents: 800 },
    CoinPackage { id: "coins_12000", coins: 12000, price_cents: 1800 },
    CoinPackage { id: "coins_30000", coins: 30000, price_cents: 4000 },
];

pub static BUNDLES: [Bundle; 3] = [
    Bundle {
        id: "starter",
        name: "Starter Bundle",
        price_cents: 500,
        coins: 1000,
        resources: ResourceGrant::new(1024, 5120, 50, 1),
    },
    Bundle {
        id: "pro",
        name: "Pro Bundle",
        price_cents: 1500,
        coins: 4000,
        resources: ResourceGrant::new(4096, 20480, 150, 2),
    },
    Bundle {
        id: "ultimate",
        name: "Ultimate Bundle",
        price_cents: 3500,
        coins: 10000,
        resources: ResourceGrant::new(8192, 51200, 300, 4),
    },
];

impl CoinPackage {
    pub fn find(id: &str) -> Result<&'static CoinPackage, EconomyError> {
        COIN_PURCHASE_OPTIONS
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| EconomyError::Validation(format!("Invalid coin package: {id}")))
    }

    pub fn price_usd(&self) -> Decimal {
        Decimal::new(self.price_cents, 2)
    }
}

impl Bundle {
    pub fn find(id: &str) -> Result<&'static Bundle, EconomyError> {
        BUNDLES
            .iter()
            .find(|b| b.id == id)
            .ok_or_else(|| EconomyError::Validation(format!("Invalid bundle: {id}")))
    }

    pub fn price_usd(&self) -> Decimal {
        Decimal::new(self.price_cents, 2)
    }
}

// =============================================================================
// Legacy single-resource store
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Ram,
    Disk,
    Cpu,
    Servers,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Ram,
        ResourceKind::Disk,
        ResourceKind::Cpu,
        ResourceKind::Servers,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Ram => "ram",
            ResourceKind::Disk => "disk",
            ResourceKind::Cpu => "cpu",
            ResourceKind::Servers => "servers",
        }
    }

    /// Grant containing `amount` of this resource only
    pub fn grant(self, amount: i64) -> ResourceGrant {
        match self {
            ResourceKind::Ram => ResourceGrant::new(amount, 0, 0, 0),
            ResourceKind::Disk => ResourceGrant::new(0, amount, 0, 0),
            ResourceKind::Cpu => ResourceGrant::new(0, 0, amount, 0),
            ResourceKind::Servers => ResourceGrant::new(0, 0, 0, amount),
        }
    }
}

impl FromStr for ResourceKind {
    type Err = EconomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| EconomyError::Validation(format!("Invalid resource: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_boost_triples() {
        let change = BoostType::Cpu.applied_change(&ServerLimits::new(1024, 2048, 100));
        assert_eq!(change, ServerLimits::new(0, 0, 200));
        assert_eq!(BoostType::Cpu.price(BoostDuration::OneHour), 100);
    }

    #[test]
    fn test_applied_change_floors() {
        // 333 * 1.5 = 499.5 -> 499
        let change = BoostType::Performance.applied_change(&ServerLimits::new(333, 1000, 0));
        assert_eq!(change, ServerLimits::new(166, 0, 0));
    }

    #[test]
    fn test_boost_prices_serialize_as_map() {
        let json = serde_json::to_value(BoostType::Cpu.spec()).unwrap();
        assert_eq!(json["prices"]["1h"], 100);
        assert_eq!(json["id"], "cpu");
    }

    #[test]
    fn test_parse_rejects_unknown_keys() {
        assert!("turbo".parse::<BoostType>().is_err());
        assert!("2h".parse::<BoostDuration>().is_err());
        assert!("diamond".parse::<PlanId>().is_err());
        assert!("platinum".parse::<ProtectionLevel>().is_err());
        assert_eq!("6h".parse::<BoostDuration>().unwrap(), BoostDuration::SixHours);
    }

    #[test]
    fn test_plan_table_lines_up_with_ids() {
        for id in PlanId::ALL {
            assert_eq!(id.plan().id, id);
        }
        assert!(PlanId::Flexible.plan().min_duration().is_none());
        assert_eq!(PlanId::Gold.plan().early_penalty(1000), 400.0);
    }

    #[test]
    fn test_catalog_prices() {
        assert_eq!(
            CoinPackage::find("coins_5000").unwrap().price_usd(),
            Decimal::new(800, 2)
        );
        assert_eq!(Bundle::find("pro").unwrap().resources.servers, 2);
        assert!(Bundle::find("mega").is_err());
    }
}
