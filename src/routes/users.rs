// User profile, AI usage and KYC routes

use super::{check_webhook_secret, WalletAuth};
use crate::error::AppError;
use crate::kyc::{KycCallback, KycStart, KycStatusView};
use crate::models::User;
use crate::staking::WalletRequest;
use crate::users::{AiUsageReport, ConnectWalletRequest, UpdateProfileRequest};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/users", post(connect_wallet))
        .route("/api/users/:wallet", get(get_user))
        .route("/api/users/:wallet/profile", put(update_profile))
        .route("/api/users/:wallet/sync-balance", post(sync_balance))
        .route("/api/users/:wallet/ai-usage", get(ai_usage).post(record_ai_usage))
        .route("/api/kyc", post(start_kyc))
        .route("/api/kyc/:wallet", get(kyc_status))
        .route("/auth/didit/callback", get(didit_redirect).post(didit_callback))
}

#[derive(Debug, Deserialize)]
struct KycRedirect {
    #[serde(alias = "walletAddress")]
    vendor_data: String,
}

async fn connect_wallet(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConnectWalletRequest>,
) -> Result<Json<User>, AppError> {
    let user = state
        .users
        .connect_wallet(req.wallet_address.trim(), Utc::now())
        .await?;
    Ok(Json(user))
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<String>,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.users.get_user(&wallet).await?))
}

async fn update_profile(
    auth: WalletAuth,
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<String>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<User>, AppError> {
    auth.require(&wallet)?;
    Ok(Json(state.users.update_profile(&wallet, req, Utc::now()).await?))
}

async fn sync_balance(
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<String>,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.users.sync_balance(&wallet, Utc::now()).await?))
}

async fn record_ai_usage(
    auth: WalletAuth,
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<String>,
) -> Result<Json<AiUsageReport>, AppError> {
    auth.require(&wallet)?;
    Ok(Json(state.users.record_ai_usage(&wallet, Utc::now()).await?))
}

async fn ai_usage(
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<String>,
) -> Result<Json<AiUsageReport>, AppError> {
    Ok(Json(state.users.ai_usage(&wallet, Utc::now()).await?))
}

async fn start_kyc(
    auth: WalletAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<WalletRequest>,
) -> Result<Json<KycStart>, AppError> {
    auth.require(&req.wallet_address)?;
    let start = state
        .kyc
        .start_verification(req.wallet_address.trim(), Utc::now())
        .await?;
    Ok(Json(start))
}

async fn kyc_status(
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<String>,
) -> Result<Json<KycStatusView>, AppError> {
    Ok(Json(state.kyc.status(&wallet).await?))
}

/// Didit redirects the browser back here. The query string is client
/// controlled, so this only reports the current status.
async fn didit_redirect(
    State(state): State<Arc<AppState>>,
    Query(redirect): Query<KycRedirect>,
) -> Result<Json<KycStatusView>, AppError> {
    Ok(Json(state.kyc.status(redirect.vendor_data.trim()).await?))
}

/// Server-to-server decision from Didit.
async fn didit_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(callback): Json<KycCallback>,
) -> Result<Json<KycStatusView>, AppError> {
    check_webhook_secret(&state, &headers, "Didit")?;
    Ok(Json(state.kyc.handle_callback(callback, Utc::now()).await?))
}
