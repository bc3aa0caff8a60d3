//! Liveness probe
//!
//! `GET /health` returns 200 while the process is serving. It does not
//! call the panel or payment processor.

use hyper::{Response, StatusCode};
use serde::Serialize;

use super::{json_response, FullBody};
use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    pub status: &'static str,
    pub version: &'static str,
    /// Seconds since the server started
    pub uptime: u64,
    pub timestamp: String,
    /// "development" or "production"
    pub mode: &'static str,
    pub node_id: String,
}

pub fn health_check(state: &AppState) -> Response<FullBody> {
    let args = &state.args;
    let body = HealthResponse {
        healthy: true,
        status: "online",
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: if args.dev_mode {
            "development"
        } else {
            "production"
        },
        node_id: args.node_id.to_string(),
    };
    json_response(StatusCode::OK, &body)
}
