//! Admin API endpoints
//!
//! ## Endpoints
//!
//! - `PUT /api/admin/users/{id}/coins` - `{coins}`; set the coin balance
//! - `PUT /api/admin/users/{id}/resources` - `{ram, disk, cpu, servers}`; replace the extra grant
//! - `PUT /api/admin/users/{id}/package` - `{package}`; assign a configured package
//!
//! ## Authentication
//!
//! All endpoints require a token with the `admin` claim.

use bytes::Bytes;
use hyper::body::Body;
use hyper::{Method, Request, Response};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use super::{not_found_response, BoxError, read_json, require_admin, respond, FullBody};
use crate::models::ResourceGrant;
use crate::server::AppState;
use crate::services::admin::AdminChange;
use crate::types::Result;

#[derive(Debug, Deserialize)]
struct CoinsRequest {
    coins: i64,
}

#[derive(Debug, Deserialize)]
struct PackageRequest {
    package: String,
}

/// Main handler for /api/admin/users/* routes
pub async fn handle_admin_request<B>(req: Request<B>, state: Arc<AppState>, path: &str) -> Response<FullBody>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let admin = match require_admin(&req, &state) {
        Ok(identity) => identity,
        Err(resp) => return resp,
    };

    let subpath = path.strip_prefix("/api/admin/users").unwrap_or("");
    let target = |suffix: &str| {
        subpath
            .strip_prefix('/')
            .and_then(|s| s.strip_suffix(suffix))
            .filter(|id| !id.is_empty() && !id.contains('/'))
            .map(str::to_string)
    };

    let result = match req.method().clone() {
        Method::PUT => {
            if let Some(id) = target("/coins") {
                set_coins(req, &state, &id).await
            } else if let Some(id) = target("/resources") {
                set_resources(req, &state, &id).await
            } else if let Some(id) = target("/package") {
                set_package(req, &state, &id).await
            } else {
                return not_found_response(path);
            }
        }
        _ => return not_found_response(path),
    };

    if let Ok(change) = &result {
        info!(admin = %admin.user_id, target = %change.user_id, path = %path, "Admin change applied");
    }
    respond(result)
}

async fn set_coins<B>(req: Request<B>, state: &AppState, user_id: &str) -> Result<AdminChange>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let body: CoinsRequest = read_json(req).await?;
    state.economy.admin.set_coins(user_id, body.coins).await
}

async fn set_resources<B>(req: Request<B>, state: &AppState, user_id: &str) -> Result<AdminChange>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let grant: ResourceGrant = read_json(req).await?;
    state.economy.admin.set_resources(user_id, grant).await
}

async fn set_package<B>(req: Request<B>, state: &AppState, user_id: &str) -> Result<AdminChange>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let body: PackageRequest = read_json(req).await?;
    state.economy.admin.set_package(user_id, &body.package).await
}
