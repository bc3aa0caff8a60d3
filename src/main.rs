//! Panel Economy - coin economy and entitlement service

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use panel_economy::{
    auth::Authenticator,
    clock::{Clock, SystemClock},
    config::{Args, StoreBackend},
    panel::{MemoryPanel, PanelClient, PterodactylClient},
    payments::{MemoryPayments, PaymentProcessor, StripeClient},
    server::{self, AppState},
    services::{Economy, EconomyDeps},
    store::{KeyValueStore, MemoryStore, MongoClient, MongoStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("panel_economy={},info", args.log_level).into());
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let economy_config = Arc::new(args.load_economy_config()?);
    let day_offset = args.day_offset()?;
    let intervals = args.ticker_intervals()?;
    let auth = Authenticator::new(args.jwt_validator()?, args.dev_mode);

    info!("======================================");
    info!("  Panel Economy");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Store: {:?}", args.store_backend);
    info!("Panel: {}", args.panel_url.as_deref().unwrap_or("in-memory"));
    info!("Packages: {}", economy_config.packages.len());
    info!("Day boundary: UTC{}", day_offset);
    info!("======================================");

    let store = build_store(&args).await?;
    let panel = build_panel(&args);
    let payments = build_payments(&args);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let economy = Arc::new(Economy::new(EconomyDeps {
        store,
        panel,
        payments,
        clock,
        config: economy_config,
        day_offset,
    }));

    let tickers = economy.tickers(intervals);
    tickers.start();

    let state = Arc::new(AppState::new(args, Arc::clone(&economy), auth));
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
    };

    let result = server::run(state, shutdown).await;

    tickers.stop().await;
    info!("Background tickers stopped");

    result.map_err(Into::into)
}

async fn build_store(args: &Args) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    match args.store_backend {
        StoreBackend::Memory => {
            warn!("Using in-memory store; all balances are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Mongo => match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
            Ok(client) => {
                info!("MongoDB connected successfully");
                Ok(Arc::new(MongoStore::new(client, args.store_timeout())))
            }
            Err(e) if args.dev_mode => {
                warn!("MongoDB connection failed (dev mode, using in-memory store): {}", e);
                Ok(Arc::new(MemoryStore::new()))
            }
            Err(e) => {
                error!("MongoDB connection failed: {}", e);
                Err(e.into())
            }
        },
    }
}

fn build_panel(args: &Args) -> Arc<dyn PanelClient> {
    match (&args.panel_url, &args.panel_api_key) {
        (Some(url), Some(key)) => Arc::new(PterodactylClient::new(url, key, args.request_timeout())),
        _ => {
            warn!("No panel configured (dev mode); using in-memory panel");
            Arc::new(MemoryPanel::new())
        }
    }
}

fn build_payments(args: &Args) -> Arc<dyn PaymentProcessor> {
    match &args.stripe_secret_key {
        Some(key) => Arc::new(StripeClient::new(
            key,
            &args.checkout_success_url,
            &args.checkout_cancel_url,
            args.request_timeout(),
        )),
        None => {
            warn!("No payment processor configured (dev mode); checkouts are paid instantly");
            Arc::new(MemoryPayments::auto_paying())
        }
    }
}
