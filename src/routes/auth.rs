// Wallet sign-in routes

use crate::auth::{AuthSession, Challenge, ChallengeRequest, VerifyRequest};
use crate::error::AppError;
use crate::AppState;
use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/auth/challenge", post(challenge))
        .route("/api/auth/verify", post(verify))
}

async fn challenge(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChallengeRequest>,
) -> Result<Json<Challenge>, AppError> {
    Ok(Json(state.auth.challenge(req.wallet_address.trim(), Utc::now()).await?))
}

async fn verify(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<AuthSession>, AppError> {
    Ok(Json(state.auth.verify(req, Utc::now()).await?))
}
