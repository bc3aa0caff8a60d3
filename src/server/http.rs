//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Routing is a single
//! `match` over method and path prefix; each area's handler does its own
//! sub-dispatch.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::auth::Authenticator;
use crate::config::Args;
use crate::routes::{self, BoxError, FullBody};
use crate::services::Economy;
use crate::types::Result;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub economy: Arc<Economy>,
    pub auth: Authenticator,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(args: Args, economy: Arc<Economy>, auth: Authenticator) -> Self {
        Self {
            args,
            economy,
            auth,
            started_at: Instant::now(),
        }
    }
}

/// Accept connections until `shutdown` resolves
pub async fn run<F>(state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Economy service listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - X-User-Id header is trusted");
    }

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);

                        let service = service_fn(move |req| {
                            let state = Arc::clone(&state);
                            async move { handle_request(state, addr, req).await }
                        });

                        if let Err(err) = http1::Builder::new()
                            .preserve_header_case(true)
                            .title_case_headers(true)
                            .serve_connection(io, service)
                            .await
                        {
                            error!("Error serving connection from {}: {:?}", addr, err);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {:?}", e);
                }
            },
            _ = &mut shutdown => {
                info!("Shutdown signal received, no longer accepting connections");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<FullBody>, Infallible> {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = route(req, state).await;

    debug!(
        remote = %addr,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request handled"
    );
    Ok(response)
}

/// Route one request to its handler
pub async fn route<B>(req: Request<B>, state: Arc<AppState>) -> Response<FullBody>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (method, path.as_str()) {
        // CORS preflight
        (Method::OPTIONS, _) => preflight_response(),

        (Method::GET, "/health") | (Method::GET, "/healthz") => routes::health_check(&state),

        (_, p) if p.starts_with("/api/boosts/") => routes::handle_boosts_request(req, state, &path).await,

        (_, p) if p.starts_with("/api/staking/") => routes::handle_staking_request(req, state, &path).await,

        (_, p) if p.starts_with("/api/daily-rewards/") => {
            routes::handle_daily_rewards_request(req, state, &path).await
        }

        (_, p) if p.starts_with("/api/v5/billing/") => routes::handle_billing_request(req, state, &path).await,

        (_, p) if p.starts_with("/api/referrals/") => routes::handle_referrals_request(req, state, &path).await,

        (_, "/api/coins") => routes::handle_coins_request(req, state, &path).await,

        (_, p) if p == "/api/resources" || p.starts_with("/api/resources/") => {
            routes::handle_resources_request(req, state, &path).await
        }

        (_, p) if p.starts_with("/api/store/") => routes::handle_store_request(req, state, &path).await,

        (_, p) if p.starts_with("/api/admin/users/") => routes::handle_admin_request(req, state, &path).await,

        _ => routes::not_found_response(&path),
    }
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}
