// Staking and tokenomics routes

use super::WalletAuth;
use crate::config::StakingTier;
use crate::error::AppError;
use crate::staking::{StakeRequest, StakingPosition, WalletRequest};
use crate::tokenomics::{RevenueDistribution, TokenomicsSummary};
use crate::AppState;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/staking/tiers", get(staking_tiers))
        .route("/api/staking/positions/:wallet", get(staking_position))
        .route("/api/staking/stake", post(stake))
        .route("/api/staking/unstake", post(unstake))
        .route("/api/staking/claim", post(claim_rewards))
        .route("/api/tokenomics/summary", get(summary))
        .route("/api/tokenomics/distribute", post(distribute))
}

#[derive(Debug, Deserialize)]
struct DistributeRequest {
    amount: Decimal,
}

async fn staking_tiers(State(state): State<Arc<AppState>>) -> Json<Vec<StakingTier>> {
    Json(state.staking.tiers().to_vec())
}

async fn staking_position(
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<String>,
) -> Result<Json<StakingPosition>, AppError> {
    Ok(Json(state.staking.position(&wallet, Utc::now()).await?))
}

async fn stake(
    auth: WalletAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<StakeRequest>,
) -> Result<Json<StakingPosition>, AppError> {
    auth.require(&req.wallet_address)?;
    Ok(Json(state.staking.stake(req, Utc::now()).await?))
}

async fn unstake(
    auth: WalletAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<WalletRequest>,
) -> Result<Json<StakingPosition>, AppError> {
    auth.require(&req.wallet_address)?;
    Ok(Json(state.staking.unstake(&req.wallet_address, Utc::now()).await?))
}

async fn claim_rewards(
    auth: WalletAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<WalletRequest>,
) -> Result<Json<StakingPosition>, AppError> {
    auth.require(&req.wallet_address)?;
    Ok(Json(state.staking.claim_rewards(&req.wallet_address, Utc::now()).await?))
}

async fn summary(State(state): State<Arc<AppState>>) -> Json<TokenomicsSummary> {
    Json(state.tokenomics.summary())
}

async fn distribute(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DistributeRequest>,
) -> Result<Json<RevenueDistribution>, AppError> {
    Ok(Json(state.tokenomics.distribute(req.amount)?))
}
