//! Resource entitlement
//!
//! `allowed = package + extra + active boost deltas`, `used = Σ server
//! limits`. Boost deltas count as allowance because a boost raises the
//! limits of a server the user already pays for; without this a boosted
//! server would push its owner over the envelope and get suspended.

use serde::Serialize;
use std::sync::Arc;

use crate::config::EconomyConfig;
use crate::models::{ResourceGrant, ServerLimits};
use crate::panel::{PanelClient, PanelServer};
use crate::services::boosts::ActiveBoostStore;
use crate::store::Table;
use crate::types::Result;

pub const EXTRA_TABLE: &str = "extra";
pub const PACKAGE_TABLE: &str = "package";

/// Allowed vs used resources for one user
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    pub package: ResourceGrant,
    pub extra: ResourceGrant,
    pub boosts: ResourceGrant,
    pub allowed: ResourceGrant,
    pub used: ResourceGrant,
    /// Negative where the user is over their envelope
    pub remaining: ResourceGrant,
}

impl Entitlement {
    /// Pure calculation over already-fetched inputs
    pub fn compute(
        package: ResourceGrant,
        extra: ResourceGrant,
        boosts: ServerLimits,
        servers: &[PanelServer],
    ) -> Self {
        let boosts = ResourceGrant::from(boosts);
        let allowed = package + extra + boosts;

        let mut usage = ServerLimits::default();
        for server in servers {
            usage += server.limits;
        }
        let used = ResourceGrant {
            servers: servers.len() as i64,
            ..ResourceGrant::from(usage)
        };

        let remaining = ResourceGrant {
            ram: allowed.ram - used.ram,
            disk: allowed.disk - used.disk,
            cpu: allowed.cpu - used.cpu,
            servers: allowed.servers - used.servers,
        };

        Self {
            package,
            extra,
            boosts,
            allowed,
            used,
            remaining,
        }
    }

    /// Names of the dimensions in which usage is above the allowance
    pub fn exceeded(&self) -> Vec<&'static str> {
        let mut over = Vec::new();
        if self.used.ram > self.allowed.ram {
            over.push("ram");
        }
        if self.used.disk > self.allowed.disk {
            over.push("disk");
        }
        if self.used.cpu > self.allowed.cpu {
            over.push("cpu");
        }
        if self.used.servers > self.allowed.servers {
            over.push("servers");
        }
        over
    }

    pub fn is_exceeded(&self) -> bool {
        !self.exceeded().is_empty()
    }

    /// Whether `request` more resources still fit inside the allowance
    pub fn admits(&self, request: &ResourceGrant) -> bool {
        request.ram <= self.remaining.ram
            && request.disk <= self.remaining.disk
            && request.cpu <= self.remaining.cpu
            && request.servers <= self.remaining.servers
    }
}

/// Fetches the inputs for [`Entitlement::compute`]
pub struct EntitlementCalculator {
    config: Arc<EconomyConfig>,
    extras: Table<ResourceGrant>,
    packages: Table<String>,
    boosts: ActiveBoostStore,
    panel: Arc<dyn PanelClient>,
}

impl EntitlementCalculator {
    pub fn new(
        config: Arc<EconomyConfig>,
        extras: Table<ResourceGrant>,
        packages: Table<String>,
        boosts: ActiveBoostStore,
        panel: Arc<dyn PanelClient>,
    ) -> Self {
        Self {
            config,
            extras,
            packages,
            boosts,
            panel,
        }
    }

    pub async fn package(&self, user_id: &str) -> Result<ResourceGrant> {
        let name = self.packages.get(user_id).await?;
        Ok(self.config.package(name.as_deref()))
    }

    pub async fn extra(&self, user_id: &str) -> Result<ResourceGrant> {
        self.extras.get_or_default(user_id).await
    }

    /// Entitlement against servers the caller already fetched
    pub async fn for_servers(&self, user_id: &str, servers: &[PanelServer]) -> Result<Entitlement> {
        let package = self.package(user_id).await?;
        let extra = self.extra(user_id).await?;
        let boosts = self.boosts.allowance_for(user_id).await?;
        Ok(Entitlement::compute(package, extra, boosts, servers))
    }

    /// Entitlement against live panel usage
    pub async fn for_user(&self, user_id: &str) -> Result<(Entitlement, Vec<PanelServer>)> {
        let servers = self.panel.list_user_servers(user_id).await?;
        let entitlement = self.for_servers(user_id, &servers).await?;
        Ok((entitlement, servers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(id: &str, memory: i64, disk: i64, cpu: i64) -> PanelServer {
        PanelServer {
            id: id.to_string(),
            name: id.to_string(),
            owner_id: "u1".to_string(),
            limits: ServerLimits::new(memory, disk, cpu),
            suspended: false,
        }
    }

    #[test]
    fn test_compute_sums_usage() {
        let servers = vec![server("a", 1024, 4096, 100), server("b", 1024, 2048, 50)];
        let e = Entitlement::compute(
            ResourceGrant::new(3072, 10240, 150, 2),
            ResourceGrant::new(1024, 0, 0, 0),
            ServerLimits::default(),
            &servers,
        );
        assert_eq!(e.used, ResourceGrant::new(2048, 6144, 150, 2));
        assert_eq!(e.allowed, ResourceGrant::new(4096, 10240, 150, 2));
        assert_eq!(e.remaining, ResourceGrant::new(2048, 4096, 0, 0));
        assert!(!e.is_exceeded());
    }

    #[test]
    fn test_exceeded_dimensions() {
        let servers = vec![server("a", 4096, 1, 1), server("b", 1, 1, 1)];
        let e = Entitlement::compute(
            ResourceGrant::new(2048, 100, 100, 1),
            ResourceGrant::default(),
            ServerLimits::default(),
            &servers,
        );
        assert_eq!(e.exceeded(), vec!["ram", "servers"]);
    }

    #[test]
    fn test_boosts_extend_allowance() {
        // cpu boost tripled a 100% server to 300%
        let servers = vec![server("a", 1024, 1024, 300)];
        let e = Entitlement::compute(
            ResourceGrant::new(2048, 2048, 150, 1),
            ResourceGrant::default(),
            ServerLimits::new(0, 0, 200),
            &servers,
        );
        assert!(!e.is_exceeded());
    }

    #[test]
    fn test_admits() {
        let e = Entitlement::compute(
            ResourceGrant::new(2048, 2048, 100, 2),
            ResourceGrant::default(),
            ServerLimits::default(),
            &[server("a", 1024, 1024, 50)],
        );
        assert!(e.admits(&ResourceGrant::new(1024, 1024, 50, 1)));
        assert!(!e.admits(&ResourceGrant::new(1025, 0, 0, 0)));
        assert!(!e.admits(&ResourceGrant::new(0, 0, 0, 2)));
    }
}
