//! HTTP routes for the economy service
//!
//! Handlers are generic over the request body so the same code serves
//! hyper's `Incoming` in production and `Full<Bytes>` in tests. Every
//! engine error goes through [`economy_error_response`].

pub mod admin;
pub mod billing;
pub mod boosts;
pub mod daily_rewards;
pub mod health;
pub mod referrals;
pub mod resources;
pub mod staking;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{error, warn};

use crate::auth::Identity;
use crate::server::AppState;
use crate::types::{EconomyError, Result};

pub use admin::handle_admin_request;
pub use billing::handle_billing_request;
pub use boosts::handle_boosts_request;
pub use daily_rewards::handle_daily_rewards_request;
pub use health::health_check;
pub use referrals::handle_referrals_request;
pub use resources::{handle_coins_request, handle_resources_request, handle_store_request};
pub use staking::handle_staking_request;

pub type FullBody = Full<Bytes>;

/// Largest JSON body any endpoint accepts
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Default and maximum `limit` for history listings
pub(crate) const DEFAULT_LIMIT: usize = 20;
pub(crate) const MAX_LIMIT: usize = 100;

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<FullBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .header("Cache-Control", "no-store")
        .body(Full::new(Bytes::from(json)))
        .unwrap()
}

pub fn error_response(status: StatusCode, error: &str, code: Option<&str>) -> Response<FullBody> {
    json_response(
        status,
        &ErrorResponse {
            error: error.to_string(),
            code: code.map(|c| c.to_string()),
        },
    )
}

/// Map an engine error to its status and public message
pub fn economy_error_response(err: &EconomyError) -> Response<FullBody> {
    if err.is_internal() {
        error!(code = err.code(), error = %err, "Request failed");
    }
    error_response(err.status(), &err.public_message(), Some(err.code()))
}

/// 200 with the value, or the mapped error
pub fn respond<T: Serialize>(result: Result<T>) -> Response<FullBody> {
    match result {
        Ok(value) => json_response(StatusCode::OK, &value),
        Err(err) => economy_error_response(&err),
    }
}

pub fn not_found_response(path: &str) -> Response<FullBody> {
    json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({
            "error": "Not Found",
            "path": path,
        }),
    )
}

/// Resolve the caller or produce the 401 response
#[allow(clippy::result_large_err)]
pub(crate) fn require_user<B>(req: &Request<B>, state: &AppState) -> std::result::Result<Identity, Response<FullBody>> {
    state
        .auth
        .authenticate(req.headers())
        .map_err(|e| economy_error_response(&e))
}

#[allow(clippy::result_large_err)]
pub(crate) fn require_admin<B>(req: &Request<B>, state: &AppState) -> std::result::Result<Identity, Response<FullBody>> {
    state
        .auth
        .require_admin(req.headers())
        .map_err(|e| economy_error_response(&e))
}

/// Boxed body error, as produced by [`Limited`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Collect and parse a JSON request body, refusing it once it passes
/// [`MAX_BODY_BYTES`]
pub(crate) async fn read_json<T, B>(req: Request<B>) -> Result<T>
where
    T: DeserializeOwned,
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let body = Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                EconomyError::Validation("Request body too large".to_string())
            } else {
                EconomyError::Validation(format!("Failed to read body: {e}"))
            }
        })?
        .to_bytes();

    serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "Rejected request body");
        EconomyError::Validation(format!("Invalid request body: {e}"))
    })
}

/// Decoded query string parameters
#[derive(Debug, Default)]
pub(crate) struct Query(HashMap<String, String>);

impl Query {
    pub fn parse(query: Option<&str>) -> Self {
        let mut params = HashMap::new();
        if let Some(q) = query {
            for pair in q.split('&') {
                if let Some((key, value)) = pair.split_once('=') {
                    let value = urlencoding::decode(&value.replace('+', " "))
                        .map(|v| v.into_owned())
                        .unwrap_or_default();
                    params.insert(key.to_string(), value);
                }
            }
        }
        Self(params)
    }

    pub fn from_request<B>(req: &Request<B>) -> Self {
        Self::parse(req.uri().query())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| EconomyError::Validation(format!("Missing query parameter: {key}")))
    }

    /// Listing limit, clamped to `1..=MAX_LIMIT`
    pub fn limit(&self) -> usize {
        self.get("limit")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(DEFAULT_LIMIT)
            .clamp(1, MAX_LIMIT)
    }
}
