// RWA Backend Server
// Users/KYC, payments and escrow, governance, staking and tokenomics over Hedera

mod auth;
mod config;
mod database;
mod error;
mod governance;
mod kyc;
mod ledger;
mod models;
mod payments;
mod routes;
mod staking;
mod tokenomics;
mod users;

#[cfg(test)]
mod testing;

use anyhow::Result;
use auth::AuthService;
use config::{Config, ConfigHandle};
use database::{Database, DynStore};
use governance::GovernanceService;
use kyc::{DiditClient, KycService};
use ledger::{HederaClient, Ledger};
use payments::{MobileMoneyRail, PaymentService, PaypalRail, StripeRail};
use staking::StakingService;
use std::sync::Arc;
use tokenomics::TokenomicsService;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;
use users::UserService;

/// Application state shared across handlers
pub struct AppState {
    pub store: DynStore,
    pub ledger: Arc<dyn Ledger>,
    pub auth: AuthService,
    pub users: UserService,
    pub kyc: KycService,
    pub payments: PaymentService,
    pub governance: Arc<GovernanceService>,
    pub staking: StakingService,
    pub tokenomics: TokenomicsService,
    pub admin_api_key: Option<String>,
    pub webhook_secret: Option<String>,
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("rwa_backend=info,sqlx=warn,tower_http=info"))?;
    let json = std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing()?;

    info!("Starting RWA Backend Server");

    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Database: {}", if config.database_url == "memory" { "memory" } else { "postgres" });
    info!("  Hedera: {} via {}", config.hedera.network, config.hedera.relay_url);
    info!("  Token: {}", config.hedera.token_id);
    info!("  Admin routes: {}", if config.admin_api_key.is_some() { "enabled" } else { "closed" });
    info!("  Server Port: {}", config.port);

    // Initialize database
    let store = Database::init(&config.database_url).await?;

    let ledger: Arc<dyn Ledger> = Arc::new(HederaClient::new(&config.hedera, config.http_timeout)?);
    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()?;

    let governance_config = Arc::new(ConfigHandle::new(config.governance.clone()));
    let staking_config = Arc::new(config.staking.clone());

    let governance = Arc::new(GovernanceService::new(
        store.clone(),
        ledger.clone(),
        governance_config.clone(),
        config.hedera.treasury_account.clone(),
        config.hedera.token_id.clone(),
    ));

    let payments = PaymentService::new(
        store.clone(),
        ledger.clone(),
        config.fees.clone(),
        config.hedera.treasury_account.clone(),
        config.hedera.escrow_account.clone(),
    )
    .with_rail(Arc::new(StripeRail::new(http.clone(), &config.stripe)))
    .with_rail(Arc::new(PaypalRail::new(http.clone(), &config.paypal)))
    .with_rail(Arc::new(MobileMoneyRail::new(http.clone(), &config.mobile_money)));

    let state = Arc::new(AppState {
        auth: AuthService::new(ledger.clone()),
        users: UserService::new(
            store.clone(),
            ledger.clone(),
            config.hedera.token_id.clone(),
            config.ai_limits,
        ),
        kyc: KycService::new(store.clone(), Arc::new(DiditClient::new(http, &config.didit))),
        payments,
        governance: governance.clone(),
        staking: StakingService::new(
            store.clone(),
            ledger.clone(),
            staking_config.clone(),
            config.hedera.token_id.clone(),
            config.hedera.treasury_account.clone(),
        ),
        tokenomics: TokenomicsService::new(
            governance_config,
            staking_config,
            config.fees.clone(),
            config.fee_allocation,
        ),
        store,
        ledger,
        admin_api_key: config.admin_api_key.clone(),
        webhook_secret: config.webhook_secret.clone(),
    });

    // Close voting windows and expire stale proposals in the background
    governance::spawn_status_updater(governance, config.governance_tick);

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("RWA Backend listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
