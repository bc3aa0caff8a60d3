//! Billing endpoints (v5 dashboard API)
//!
//! - `GET /api/v5/billing/info` - Credit, recent transactions and catalog
//! - `POST /api/v5/billing/checkout` - `{amount_usd}`; returns the hosted checkout URL
//! - `GET /api/v5/billing/verify-checkout?session_id=` - Credit a paid session once
//! - `POST /api/v5/billing/purchase-coins` - `{package_id}`
//! - `POST /api/v5/billing/purchase-bundle` - `{bundle_id}`

use bytes::Bytes;
use hyper::body::Body;
use hyper::{Method, Request, Response};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{not_found_response, BoxError, read_json, require_user, respond, FullBody, Query};
use crate::server::AppState;
use crate::services::billing::{BundlePurchase, CoinPurchase};
use crate::types::Result;

#[derive(Debug, Deserialize)]
struct CheckoutRequest {
    amount_usd: Decimal,
}

#[derive(Debug, Deserialize)]
struct CoinsRequest {
    package_id: String,
}

#[derive(Debug, Deserialize)]
struct BundleRequest {
    bundle_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutResult {
    session_id: String,
    url: Option<String>,
}

/// Main handler for /api/v5/billing/* routes
pub async fn handle_billing_request<B>(req: Request<B>, state: Arc<AppState>, path: &str) -> Response<FullBody>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let identity = match require_user(&req, &state) {
        Ok(identity) => identity,
        Err(resp) => return resp,
    };
    let user_id = identity.user_id.as_str();
    let billing = &state.economy.billing;
    let subpath = path.strip_prefix("/api/v5/billing").unwrap_or("");

    match (req.method().clone(), subpath) {
        (Method::GET, "/info") => respond(billing.info(user_id).await),

        (Method::POST, "/checkout") => respond(checkout(req, &state, user_id).await),

        (Method::GET, "/verify-checkout") => {
            let query = Query::from_request(&req);
            let result = match query.require("session_id") {
                Ok(session_id) => billing.verify_checkout(session_id, user_id).await,
                Err(e) => Err(e),
            };
            respond(result)
        }

        (Method::POST, "/purchase-coins") => respond(purchase_coins(req, &state, user_id).await),

        (Method::POST, "/purchase-bundle") => respond(purchase_bundle(req, &state, user_id).await),

        _ => not_found_response(path),
    }
}

async fn checkout<B>(req: Request<B>, state: &AppState, user_id: &str) -> Result<CheckoutResult>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let body: CheckoutRequest = read_json(req).await?;
    let session = state.economy.billing.create_checkout(user_id, body.amount_usd).await?;
    Ok(CheckoutResult {
        session_id: session.id,
        url: session.url,
    })
}

async fn purchase_coins<B>(req: Request<B>, state: &AppState, user_id: &str) -> Result<CoinPurchase>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let body: CoinsRequest = read_json(req).await?;
    state.economy.billing.purchase_coins(user_id, &body.package_id).await
}

async fn purchase_bundle<B>(req: Request<B>, state: &AppState, user_id: &str) -> Result<BundlePurchase>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let body: BundleRequest = read_json(req).await?;
    state.economy.billing.purchase_bundle(user_id, &body.bundle_id).await
}
