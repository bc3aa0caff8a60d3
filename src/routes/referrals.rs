//! Referral endpoints
//!
//! - `GET /api/referrals/generate?code=` - Publish a referral code
//! - `GET /api/referrals/claim?code=` - Claim someone else's code (once per user)

use chrono::{DateTime, Utc};
use hyper::{Method, Request, Response};
use serde::Serialize;
use std::sync::Arc;

use super::{not_found_response, require_user, respond, FullBody, Query};
use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedCode {
    code: String,
    created_at: DateTime<Utc>,
}

/// Main handler for /api/referrals/* routes
pub async fn handle_referrals_request<B>(req: Request<B>, state: Arc<AppState>, path: &str) -> Response<FullBody> {
    let identity = match require_user(&req, &state) {
        Ok(identity) => identity,
        Err(resp) => return resp,
    };
    let user_id = identity.user_id.as_str();
    let referrals = &state.economy.referrals;
    let query = Query::from_request(&req);
    let subpath = path.strip_prefix("/api/referrals").unwrap_or("");

    match (req.method().clone(), subpath) {
        (Method::GET, "/generate") => {
            let result = match query.require("code") {
                Ok(code) => referrals
                    .generate(user_id, code)
                    .await
                    .map(|record| GeneratedCode {
                        code: code.to_string(),
                        created_at: record.created_at,
                    }),
                Err(e) => Err(e),
            };
            respond(result)
        }

        (Method::GET, "/claim") => {
            let result = match query.require("code") {
                Ok(code) => referrals.claim(user_id, code).await,
                Err(e) => Err(e),
            };
            respond(result)
        }

        _ => not_found_response(path),
    }
}
