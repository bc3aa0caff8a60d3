//! Staking endpoints
//!
//! - `GET /api/staking/plans`
//! - `GET /api/staking/stakes` - Caller's stakes, active and claimed
//! - `GET /api/staking/summary`
//! - `GET /api/staking/history?limit=`
//! - `GET /api/staking/calculate?planId=&amount=&days=`
//! - `POST /api/staking/stakes` - `{planId, amount}`
//! - `POST /api/staking/stakes/{id}/claim`

use bytes::Bytes;
use hyper::body::Body;
use hyper::{Method, Request, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{not_found_response, BoxError, read_json, require_user, respond, FullBody, Query};
use crate::catalog::PlanId;
use crate::server::AppState;
use crate::services::staking::{self, ClaimOutcome, Stake, StakeProjection, StakingTransaction};
use crate::types::{EconomyError, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StakeRequest {
    plan_id: String,
    amount: i64,
}

#[derive(Serialize)]
struct StakeList {
    stakes: Vec<Stake>,
}

#[derive(Serialize)]
struct HistoryList {
    history: Vec<StakingTransaction>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StakeResult {
    stake: Stake,
    balance: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClaimResult {
    #[serde(flatten)]
    outcome: ClaimOutcome,
    balance: i64,
}

/// Main handler for /api/staking/* routes
pub async fn handle_staking_request<B>(req: Request<B>, state: Arc<AppState>, path: &str) -> Response<FullBody>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let identity = match require_user(&req, &state) {
        Ok(identity) => identity,
        Err(resp) => return resp,
    };
    let user_id = identity.user_id.as_str();
    let engine = &state.economy.staking;
    let subpath = path.strip_prefix("/api/staking").unwrap_or("");

    match (req.method().clone(), subpath) {
        (Method::GET, "/plans") => respond(Ok(engine.plans())),

        (Method::GET, "/stakes") => respond(engine.list(user_id).await.map(|stakes| StakeList { stakes })),

        (Method::GET, "/summary") => respond(engine.summary(user_id).await),

        (Method::GET, "/history") => {
            let limit = Query::from_request(&req).limit();
            respond(
                engine
                    .history(user_id, limit)
                    .await
                    .map(|history| HistoryList { history }),
            )
        }

        (Method::GET, "/calculate") => respond(projection(&Query::from_request(&req))),

        (Method::POST, "/stakes") => respond(create(req, &state, user_id).await),

        (Method::POST, p) if p.starts_with("/stakes/") && p.ends_with("/claim") => {
            let id = p
                .strip_prefix("/stakes/")
                .and_then(|s| s.strip_suffix("/claim"))
                .unwrap_or("");
            if id.is_empty() || id.contains('/') {
                return not_found_response(path);
            }
            respond(claim(&state, user_id, id).await)
        }

        _ => not_found_response(path),
    }
}

fn projection(query: &Query) -> Result<StakeProjection> {
    let plan_id: PlanId = query.require("planId")?.parse()?;
    let amount = parse_number(query.require("amount")?, "amount")?;
    let days = parse_number(query.require("days")?, "days")?;
    staking::calculate(plan_id, amount, days)
}

fn parse_number(value: &str, name: &str) -> Result<i64> {
    value
        .parse()
        .map_err(|_| EconomyError::Validation(format!("{name} must be an integer")))
}

async fn create<B>(req: Request<B>, state: &AppState, user_id: &str) -> Result<StakeResult>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let body: StakeRequest = read_json(req).await?;
    let plan_id: PlanId = body.plan_id.parse()?;

    let stake = state.economy.staking.create(user_id, plan_id, body.amount).await?;
    let balance = state.economy.ledger.balance(user_id).await?;
    Ok(StakeResult { stake, balance })
}

async fn claim(state: &AppState, user_id: &str, stake_id: &str) -> Result<ClaimResult> {
    let outcome = state.economy.staking.claim(user_id, stake_id).await?;
    let balance = state.economy.ledger.balance(user_id).await?;
    Ok(ClaimResult { outcome, balance })
}
