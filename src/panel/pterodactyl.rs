//! Pterodactyl application API client
//!
//! Dashboard users are linked to panel users through the panel's
//! `external_id`, so `owner_id` on a [`PanelServer`] is the dashboard id.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, warn};

use super::{PanelClient, PanelServer};
use crate::models::ServerLimits;
use crate::types::{EconomyError, Result};

pub struct PterodactylClient {
    base_url: String,
    api_key: String,
    http_client: reqwest::Client,
}

/// `{ "object": ..., "attributes": T }` envelope used by every response
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    attributes: T,
}

#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    data: Vec<Envelope<T>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct ApiLimits {
    memory: i64,
    swap: i64,
    disk: i64,
    io: i64,
    cpu: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    threads: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiServer {
    id: i64,
    name: String,
    user: i64,
    #[serde(default)]
    suspended: bool,
    limits: ApiLimits,
    feature_limits: JsonValue,
    allocation: i64,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: i64,
    external_id: Option<String>,
    #[serde(default)]
    relationships: Option<UserRelationships>,
}

#[derive(Debug, Deserialize)]
struct UserRelationships {
    servers: ListEnvelope<ApiServer>,
}

#[derive(Debug, Serialize)]
struct BuildPatch<'a> {
    allocation: i64,
    memory: i64,
    swap: i64,
    disk: i64,
    io: i64,
    cpu: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    threads: Option<&'a str>,
    feature_limits: &'a JsonValue,
}

impl PterodactylClient {
    pub fn new(base_url: &str, api_key: &str, request_timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent("panel-economy/0.1")
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http_client,
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.http_client
            .request(method, format!("{}/api/application{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
    }

    /// Map non-success statuses to upstream errors, 404 to `None`
    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Option<reqwest::Response>> {
        let response = builder.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Panel request failed");
            return Err(EconomyError::Upstream(format!("panel returned {status}")));
        }
        Ok(Some(response))
    }

    async fn fetch_server(&self, server_id: &str) -> Result<Option<ApiServer>> {
        let response = self
            .send(self.request(Method::GET, &format!("/servers/{server_id}")))
            .await?;
        match response {
            Some(r) => Ok(Some(r.json::<Envelope<ApiServer>>().await?.attributes)),
            None => Ok(None),
        }
    }

    async fn fetch_user(&self, panel_user_id: i64) -> Result<Option<ApiUser>> {
        let response = self
            .send(self.request(Method::GET, &format!("/users/{panel_user_id}")))
            .await?;
        match response {
            Some(r) => Ok(Some(r.json::<Envelope<ApiUser>>().await?.attributes)),
            None => Ok(None),
        }
    }

    async fn power_action(&self, server_id: &str, action: &str) -> Result<()> {
        let path = format!("/servers/{server_id}/{action}");
        match self.send(self.request(Method::POST, &path)).await? {
            Some(_) => {
                debug!(server_id = %server_id, action = %action, "Panel server state changed");
                Ok(())
            }
            None => Err(EconomyError::ServerNotFound(server_id.to_string())),
        }
    }
}

fn to_panel_server(server: ApiServer, owner_id: String) -> PanelServer {
    PanelServer {
        id: server.id.to_string(),
        name: server.name,
        owner_id,
        limits: ServerLimits::new(server.limits.memory, server.limits.disk, server.limits.cpu),
        suspended: server.suspended,
    }
}

#[async_trait]
impl PanelClient for PterodactylClient {
    async fn get_server(&self, server_id: &str) -> Result<Option<PanelServer>> {
        let Some(server) = self.fetch_server(server_id).await? else {
            return Ok(None);
        };
        let owner_id = match self.fetch_user(server.user).await? {
            Some(user) => user.external_id.unwrap_or_else(|| user.id.to_string()),
            None => server.user.to_string(),
        };
        Ok(Some(to_panel_server(server, owner_id)))
    }

    async fn patch_server_build(&self, server_id: &str, limits: ServerLimits) -> Result<()> {
        // The build endpoint wants the full build block, so start from current values
        let current = self
            .fetch_server(server_id)
            .await?
            .ok_or_else(|| EconomyError::ServerNotFound(server_id.to_string()))?;

        let patch = BuildPatch {
            allocation: current.allocation,
            memory: limits.memory,
            swap: current.limits.swap,
            disk: limits.disk,
            io: current.limits.io,
            cpu: limits.cpu,
            threads: current.limits.threads.as_deref(),
            feature_limits: &current.feature_limits,
        };

        let path = format!("/servers/{server_id}/build");
        match self
            .send(self.request(Method::PATCH, &path).json(&patch))
            .await?
        {
            Some(_) => {
                debug!(
                    server_id = %server_id,
                    memory = limits.memory,
                    disk = limits.disk,
                    cpu = limits.cpu,
                    "Patched server build"
                );
                Ok(())
            }
            None => Err(EconomyError::ServerNotFound(server_id.to_string())),
        }
    }

    async fn suspend_server(&self, server_id: &str) -> Result<()> {
        self.power_action(server_id, "suspend").await
    }

    async fn unsuspend_server(&self, server_id: &str) -> Result<()> {
        self.power_action(server_id, "unsuspend").await
    }

    async fn list_user_servers(&self, user_id: &str) -> Result<Vec<PanelServer>> {
        let path = format!(
            "/users/external/{}?include=servers",
            urlencoding::encode(user_id)
        );
        let Some(response) = self.send(self.request(Method::GET, &path)).await? else {
            // Not linked to a panel account yet
            return Ok(Vec::new());
        };
        let user = response.json::<Envelope<ApiUser>>().await?.attributes;
        Ok(user
            .relationships
            .map(|r| r.servers.data)
            .unwrap_or_default()
            .into_iter()
            .map(|s| to_panel_server(s.attributes, user_id.to_string()))
            .collect())
    }
}
