//! In-process panel used in dev mode and tests

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{PanelClient, PanelServer};
use crate::models::ServerLimits;
use crate::types::{EconomyError, Result};

#[derive(Default)]
pub struct MemoryPanel {
    servers: DashMap<String, PanelServer>,
    /// Servers whose calls fail, to exercise upstream error paths
    failing: DashSet<String>,
    patch_calls: AtomicUsize,
}

impl MemoryPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_server(&self, id: &str, owner_id: &str, limits: ServerLimits) {
        self.servers.insert(
            id.to_string(),
            PanelServer {
                id: id.to_string(),
                name: format!("server-{id}"),
                owner_id: owner_id.to_string(),
                limits,
                suspended: false,
            },
        );
    }

    pub fn remove_server(&self, id: &str) {
        self.servers.remove(id);
    }

    pub fn server(&self, id: &str) -> Option<PanelServer> {
        self.servers.get(id).map(|s| s.clone())
    }

    /// Make every call touching `id` fail with an upstream error
    pub fn fail_server(&self, id: &str) {
        self.failing.insert(id.to_string());
    }

    pub fn heal_server(&self, id: &str) {
        self.failing.remove(id);
    }

    pub fn patch_calls(&self) -> usize {
        self.patch_calls.load(Ordering::SeqCst)
    }

    fn check(&self, id: &str) -> Result<()> {
        if self.failing.contains(id) {
            return Err(EconomyError::Upstream(format!("panel unavailable for {id}")));
        }
        Ok(())
    }

    fn with_server<F>(&self, id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut PanelServer),
    {
        self.check(id)?;
        match self.servers.get_mut(id) {
            Some(mut server) => {
                f(&mut server);
                Ok(())
            }
            None => Err(EconomyError::ServerNotFound(id.to_string())),
        }
    }
}

#[async_trait]
impl PanelClient for MemoryPanel {
    async fn get_server(&self, server_id: &str) -> Result<Option<PanelServer>> {
        self.check(server_id)?;
        Ok(self.server(server_id))
    }

    async fn patch_server_build(&self, server_id: &str, limits: ServerLimits) -> Result<()> {
        self.patch_calls.fetch_add(1, Ordering::SeqCst);
        self.with_server(server_id, |s| s.limits = limits)
    }

    async fn suspend_server(&self, server_id: &str) -> Result<()> {
        self.with_server(server_id, |s| s.suspended = true)
    }

    async fn unsuspend_server(&self, server_id: &str) -> Result<()> {
        self.with_server(server_id, |s| s.suspended = false)
    }

    async fn list_user_servers(&self, user_id: &str) -> Result<Vec<PanelServer>> {
        let mut servers: Vec<PanelServer> = self
            .servers
            .iter()
            .filter(|s| s.owner_id == user_id)
            .map(|s| s.clone())
            .collect();
        servers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(servers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_patch_and_suspend() {
        let panel = MemoryPanel::new();
        panel.add_server("s1", "u1", ServerLimits::new(1024, 2048, 100));

        panel
            .patch_server_build("s1", ServerLimits::new(2048, 2048, 100))
            .await
            .unwrap();
        panel.suspend_server("s1").await.unwrap();

        let server = panel.get_server("s1").await.unwrap().unwrap();
        assert_eq!(server.limits.memory, 2048);
        assert!(server.suspended);
        assert_eq!(panel.patch_calls(), 1);
    }

    #[tokio::test]
    async fn test_failing_server() {
        let panel = MemoryPanel::new();
        panel.add_server("s1", "u1", ServerLimits::default());
        panel.fail_server("s1");
        assert!(panel.suspend_server("s1").await.is_err());
        panel.heal_server("s1");
        assert!(panel.suspend_server("s1").await.is_ok());
        assert!(panel.get_server("nope").await.unwrap().is_none());
    }
}
