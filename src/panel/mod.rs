//! Hosting panel client
//!
//! The economy only needs five panel operations: read a server, patch its
//! build limits, suspend, unsuspend, and list a user's servers. Every call
//! is a single attempt; callers decide whether a failure aborts the
//! enclosing operation or is logged and skipped.
//!
//! - [`PterodactylClient`]: Pterodactyl application API over reqwest
//! - [`MemoryPanel`]: in-process panel for dev mode and tests

pub mod memory;
pub mod pterodactyl;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::ServerLimits;
use crate::types::Result;

pub use memory::MemoryPanel;
pub use pterodactyl::PterodactylClient;

/// Server as seen by the economy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelServer {
    pub id: String,
    pub name: String,
    /// Dashboard user id of the owner
    pub owner_id: String,
    pub limits: ServerLimits,
    pub suspended: bool,
}

#[async_trait]
pub trait PanelClient: Send + Sync {
    /// `Ok(None)` when the panel has no such server
    async fn get_server(&self, server_id: &str) -> Result<Option<PanelServer>>;

    /// Replace memory/disk/cpu limits, leaving other build settings untouched
    async fn patch_server_build(&self, server_id: &str, limits: ServerLimits) -> Result<()>;

    async fn suspend_server(&self, server_id: &str) -> Result<()>;

    async fn unsuspend_server(&self, server_id: &str) -> Result<()>;

    async fn list_user_servers(&self, user_id: &str) -> Result<Vec<PanelServer>>;
}
