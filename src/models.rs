//! Resource shapes shared by entitlement, boosts and purchases

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Additive resource envelope: RAM and disk in MB, CPU in percent of a core
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGrant {
    #[serde(default)]
    pub ram: i64,
    #[serde(default)]
    pub disk: i64,
    #[serde(default)]
    pub cpu: i64,
    #[serde(default)]
    pub servers: i64,
}

impl ResourceGrant {
    pub const fn new(ram: i64, disk: i64, cpu: i64, servers: i64) -> Self {
        Self {
            ram,
            disk,
            cpu,
            servers,
        }
    }

    pub fn is_non_negative(&self) -> bool {
        self.ram >= 0 && self.disk >= 0 && self.cpu >= 0 && self.servers >= 0
    }
}

impl Add for ResourceGrant {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            ram: self.ram + rhs.ram,
            disk: self.disk + rhs.disk,
            cpu: self.cpu + rhs.cpu,
            servers: self.servers + rhs.servers,
        }
    }
}

impl AddAssign for ResourceGrant {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for ResourceGrant {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self {
            ram: self.ram - rhs.ram,
            disk: self.disk - rhs.disk,
            cpu: self.cpu - rhs.cpu,
            servers: self.servers - rhs.servers,
        }
    }
}

impl SubAssign for ResourceGrant {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

/// Build limits of a single panel server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerLimits {
    pub memory: i64,
    pub disk: i64,
    pub cpu: i64,
}

impl ServerLimits {
    pub const fn new(memory: i64, disk: i64, cpu: i64) -> Self {
        Self { memory, disk, cpu }
    }
}

impl Add for ServerLimits {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            memory: self.memory + rhs.memory,
            disk: self.disk + rhs.disk,
            cpu: self.cpu + rhs.cpu,
        }
    }
}

impl AddAssign for ServerLimits {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for ServerLimits {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self {
            memory: self.memory - rhs.memory,
            disk: self.disk - rhs.disk,
            cpu: self.cpu - rhs.cpu,
        }
    }
}

impl From<ServerLimits> for ResourceGrant {
    fn from(limits: ServerLimits) -> Self {
        Self {
            ram: limits.memory,
            disk: limits.disk,
            cpu: limits.cpu,
            servers: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_addition() {
        let mut total = ResourceGrant::new(1024, 5120, 100, 1);
        total += ResourceGrant::new(1024, 0, 50, 1);
        assert_eq!(total, ResourceGrant::new(2048, 5120, 150, 2));
    }

    #[test]
    fn test_grant_missing_fields_default_to_zero() {
        let grant: ResourceGrant = serde_json::from_str(r#"{"ram": 512}"#).unwrap();
        assert_eq!(grant, ResourceGrant::new(512, 0, 0, 0));
    }
}
