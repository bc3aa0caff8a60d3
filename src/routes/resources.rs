//! Balance, entitlement and legacy store endpoints
//!
//! - `GET /api/coins` - Caller's coin balance
//! - `GET /api/resources` - Entitlement breakdown and owned servers
//! - `POST /api/resources/check` - `{ram, disk, cpu, servers?}`; would a new server fit
//! - `POST /api/store/buy` - `{resource, units}`

use bytes::Bytes;
use hyper::body::Body;
use hyper::{Method, Request, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{not_found_response, BoxError, read_json, require_user, respond, FullBody};
use crate::catalog::ResourceKind;
use crate::models::ResourceGrant;
use crate::panel::PanelServer;
use crate::server::AppState;
use crate::services::entitlement::Entitlement;
use crate::services::resource_store::StorePurchase;
use crate::types::{EconomyError, Result};

#[derive(Serialize)]
struct CoinsResult {
    coins: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourcesResult {
    #[serde(flatten)]
    entitlement: Entitlement,
    exceeded: Vec<&'static str>,
    servers: Vec<PanelServer>,
}

#[derive(Debug, Deserialize)]
struct CheckRequest {
    #[serde(default)]
    ram: i64,
    #[serde(default)]
    disk: i64,
    #[serde(default)]
    cpu: i64,
    /// Server slots the request needs; one new server unless stated
    #[serde(default = "one")]
    servers: i64,
}

fn one() -> i64 {
    1
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckResult {
    allowed: bool,
    requested: ResourceGrant,
    remaining: ResourceGrant,
}

#[derive(Debug, Deserialize)]
struct BuyRequest {
    resource: String,
    units: i64,
}

pub async fn handle_coins_request<B>(req: Request<B>, state: Arc<AppState>, path: &str) -> Response<FullBody> {
    let identity = match require_user(&req, &state) {
        Ok(identity) => identity,
        Err(resp) => return resp,
    };
    match (req.method().clone(), path) {
        (Method::GET, "/api/coins") => respond(
            state
                .economy
                .ledger
                .balance(&identity.user_id)
                .await
                .map(|coins| CoinsResult { coins }),
        ),
        _ => not_found_response(path),
    }
}

/// Main handler for /api/resources/* routes
pub async fn handle_resources_request<B>(req: Request<B>, state: Arc<AppState>, path: &str) -> Response<FullBody>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let identity = match require_user(&req, &state) {
        Ok(identity) => identity,
        Err(resp) => return resp,
    };
    let user_id = identity.user_id.as_str();
    let subpath = path.strip_prefix("/api/resources").unwrap_or("");

    match (req.method().clone(), subpath) {
        (Method::GET, "") | (Method::GET, "/") => respond(resources(&state, user_id).await),
        (Method::POST, "/check") => respond(check(req, &state, user_id).await),
        _ => not_found_response(path),
    }
}

/// Main handler for /api/store/* routes
pub async fn handle_store_request<B>(req: Request<B>, state: Arc<AppState>, path: &str) -> Response<FullBody>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let identity = match require_user(&req, &state) {
        Ok(identity) => identity,
        Err(resp) => return resp,
    };
    match (req.method().clone(), path) {
        (Method::POST, "/api/store/buy") => respond(buy(req, &state, &identity.user_id).await),
        _ => not_found_response(path),
    }
}

async fn resources(state: &AppState, user_id: &str) -> Result<ResourcesResult> {
    let (entitlement, servers) = state.economy.entitlement.for_user(user_id).await?;
    Ok(ResourcesResult {
        exceeded: entitlement.exceeded(),
        entitlement,
        servers,
    })
}

async fn check<B>(req: Request<B>, state: &AppState, user_id: &str) -> Result<CheckResult>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let body: CheckRequest = read_json(req).await?;
    let requested = ResourceGrant::new(body.ram, body.disk, body.cpu, body.servers);
    if !requested.is_non_negative() {
        return Err(EconomyError::Validation(
            "Requested resources cannot be negative".to_string(),
        ));
    }

    let (entitlement, _) = state.economy.entitlement.for_user(user_id).await?;
    Ok(CheckResult {
        allowed: entitlement.admits(&requested),
        requested,
        remaining: entitlement.remaining,
    })
}

async fn buy<B>(req: Request<B>, state: &AppState, user_id: &str) -> Result<StorePurchase>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let body: BuyRequest = read_json(req).await?;
    let resource: ResourceKind = body.resource.parse()?;
    state.economy.resource_store.buy(user_id, resource, body.units).await
}
