//! Daily reward endpoints
//!
//! - `GET /api/daily-rewards/status`
//! - `POST /api/daily-rewards/claim`
//! - `POST /api/daily-rewards/protection` - `{level}`
//! - `GET /api/daily-rewards/history?limit=`
//! - `GET /api/daily-rewards/leaderboard?limit=`

use bytes::Bytes;
use hyper::body::Body;
use hyper::{Method, Request, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use super::{not_found_response, BoxError, read_json, require_user, respond, FullBody, Query};
use crate::catalog::ProtectionLevel;
use crate::server::AppState;
use crate::services::daily_rewards::{DailyClaim, DailyClaimOutcome, LeaderboardEntry};
use crate::types::Result;

#[derive(Debug, Deserialize)]
struct ProtectionRequest {
    level: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClaimResult {
    #[serde(flatten)]
    outcome: DailyClaimOutcome,
    balance: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProtectionResult {
    level: ProtectionLevel,
    streak_protection: u32,
    balance: i64,
}

#[derive(Serialize)]
struct HistoryList {
    history: Vec<DailyClaim>,
}

#[derive(Serialize)]
struct Leaderboard {
    leaderboard: Vec<LeaderboardEntry>,
}

/// Main handler for /api/daily-rewards/* routes
pub async fn handle_daily_rewards_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
    path: &str,
) -> Response<FullBody>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let identity = match require_user(&req, &state) {
        Ok(identity) => identity,
        Err(resp) => return resp,
    };
    let user_id = identity.user_id.as_str();
    let engine = &state.economy.daily;
    let subpath = path.strip_prefix("/api/daily-rewards").unwrap_or("");

    match (req.method().clone(), subpath) {
        (Method::GET, "/status") => respond(engine.status(user_id).await),

        (Method::POST, "/claim") => respond(claim(&state, user_id).await),

        (Method::POST, "/protection") => respond(protection(req, &state, user_id).await),

        (Method::GET, "/history") => {
            let limit = Query::from_request(&req).limit();
            respond(
                engine
                    .history(user_id, limit)
                    .await
                    .map(|history| HistoryList { history }),
            )
        }

        (Method::GET, "/leaderboard") => {
            let limit = Query::from_request(&req).limit();
            respond(
                engine
                    .leaderboard(limit)
                    .await
                    .map(|leaderboard| Leaderboard { leaderboard }),
            )
        }

        _ => not_found_response(path),
    }
}

async fn claim(state: &AppState, user_id: &str) -> Result<ClaimResult> {
    let daily = &state.economy.daily;
    let outcome = daily.claim(user_id).await?;

    // Best effort: the claim has already paid out
    if let Err(e) = daily.update_leaderboard(user_id).await {
        warn!(user_id = %user_id, error = %e, "Leaderboard update failed");
    }

    let balance = state.economy.ledger.balance(user_id).await?;
    Ok(ClaimResult { outcome, balance })
}

async fn protection<B>(req: Request<B>, state: &AppState, user_id: &str) -> Result<ProtectionResult>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let body: ProtectionRequest = read_json(req).await?;
    let level: ProtectionLevel = body.level.parse()?;

    let streak_protection = state.economy.daily.purchase_protection(user_id, level).await?;
    let balance = state.economy.ledger.balance(user_id).await?;
    Ok(ProtectionResult {
        level,
        streak_protection,
        balance,
    })
}
