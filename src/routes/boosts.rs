//! Boost endpoints
//!
//! - `GET /api/boosts/types` - Catalog of boost types and prices
//! - `GET /api/boosts/active` - Caller's running boosts
//! - `GET /api/boosts/scheduled` - Caller's pending scheduled boosts
//! - `GET /api/boosts/history?limit=` - Caller's boost activity
//! - `POST /api/boosts/apply` - `{serverId, boostType, duration}`
//! - `POST /api/boosts/cancel` - `{boostId}`
//! - `POST /api/boosts/extend` - `{boostId, duration}`
//! - `POST /api/boosts/schedule` - `{serverId, boostType, duration, scheduledTime}`
//! - `POST /api/boosts/cancel-scheduled` - `{scheduledBoostId}`

use bytes::Bytes;
use chrono::{DateTime, Utc};
use hyper::body::Body;
use hyper::{Method, Request, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{not_found_response, BoxError, read_json, require_user, respond, FullBody, Query};
use crate::catalog::{BoostDuration, BoostType};
use crate::server::AppState;
use crate::services::boosts::{Boost, BoostActivity, ScheduledBoost};
use crate::types::Result;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplyRequest {
    server_id: String,
    boost_type: String,
    duration: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelRequest {
    boost_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtendRequest {
    boost_id: String,
    duration: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleRequest {
    server_id: String,
    boost_type: String,
    duration: String,
    scheduled_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelScheduledRequest {
    scheduled_boost_id: String,
}

#[derive(Serialize)]
struct BoostList {
    boosts: Vec<Boost>,
}

#[derive(Serialize)]
struct ScheduledList {
    scheduled: Vec<ScheduledBoost>,
}

#[derive(Serialize)]
struct HistoryList {
    history: Vec<BoostActivity>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BoostResult {
    boost: Boost,
    balance: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScheduledResult {
    scheduled: ScheduledBoost,
    balance: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefundResult {
    refund: i64,
    balance: i64,
}

/// Main handler for /api/boosts/* routes
pub async fn handle_boosts_request<B>(req: Request<B>, state: Arc<AppState>, path: &str) -> Response<FullBody>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let identity = match require_user(&req, &state) {
        Ok(identity) => identity,
        Err(resp) => return resp,
    };
    let user_id = identity.user_id.as_str();
    let economy = &state.economy;
    let subpath = path.strip_prefix("/api/boosts").unwrap_or("");

    match (req.method().clone(), subpath) {
        (Method::GET, "/types") => respond(Ok(economy.boosts.types())),

        (Method::GET, "/active") => respond(
            economy
                .boosts
                .active(user_id)
                .await
                .map(|boosts| BoostList { boosts }),
        ),

        (Method::GET, "/scheduled") => respond(
            economy
                .boosts
                .scheduled(user_id)
                .await
                .map(|scheduled| ScheduledList { scheduled }),
        ),

        (Method::GET, "/history") => {
            let limit = Query::from_request(&req).limit();
            respond(
                economy
                    .boosts
                    .history(user_id, limit)
                    .await
                    .map(|history| HistoryList { history }),
            )
        }

        (Method::POST, "/apply") => respond(apply(req, &state, user_id).await),
        (Method::POST, "/cancel") => respond(cancel(req, &state, user_id).await),
        (Method::POST, "/extend") => respond(extend(req, &state, user_id).await),
        (Method::POST, "/schedule") => respond(schedule(req, &state, user_id).await),
        (Method::POST, "/cancel-scheduled") => respond(cancel_scheduled(req, &state, user_id).await),

        _ => not_found_response(path),
    }
}

async fn apply<B>(req: Request<B>, state: &AppState, user_id: &str) -> Result<BoostResult>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let body: ApplyRequest = read_json(req).await?;
    let boost_type: BoostType = body.boost_type.parse()?;
    let duration: BoostDuration = body.duration.parse()?;

    let boosts = &state.economy.boosts;
    let boost = boosts.apply(user_id, &body.server_id, boost_type, duration).await?;
    let balance = state.economy.ledger.balance(user_id).await?;
    Ok(BoostResult { boost, balance })
}

async fn cancel<B>(req: Request<B>, state: &AppState, user_id: &str) -> Result<RefundResult>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let body: CancelRequest = read_json(req).await?;
    let refund = state.economy.boosts.cancel(user_id, &body.boost_id).await?;
    let balance = state.economy.ledger.balance(user_id).await?;
    Ok(RefundResult { refund, balance })
}

async fn extend<B>(req: Request<B>, state: &AppState, user_id: &str) -> Result<BoostResult>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let body: ExtendRequest = read_json(req).await?;
    let duration: BoostDuration = body.duration.parse()?;

    let boost = state.economy.boosts.extend(user_id, &body.boost_id, duration).await?;
    let balance = state.economy.ledger.balance(user_id).await?;
    Ok(BoostResult { boost, balance })
}

async fn schedule<B>(req: Request<B>, state: &AppState, user_id: &str) -> Result<ScheduledResult>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let body: ScheduleRequest = read_json(req).await?;
    let boost_type: BoostType = body.boost_type.parse()?;
    let duration: BoostDuration = body.duration.parse()?;

    let scheduled = state
        .economy
        .boosts
        .schedule(user_id, &body.server_id, boost_type, duration, body.scheduled_time)
        .await?;
    let balance = state.economy.ledger.balance(user_id).await?;
    Ok(ScheduledResult { scheduled, balance })
}

async fn cancel_scheduled<B>(req: Request<B>, state: &AppState, user_id: &str) -> Result<RefundResult>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let body: CancelScheduledRequest = read_json(req).await?;
    let refund = state
        .economy
        .boosts
        .cancel_scheduled(user_id, &body.scheduled_boost_id)
        .await?;
    let balance = state.economy.ledger.balance(user_id).await?;
    Ok(RefundResult { refund, balance })
}
