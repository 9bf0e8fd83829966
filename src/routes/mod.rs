// HTTP surface: one router per area, merged under shared state

mod auth;
mod governance;
mod payments;
mod tokenomics;
mod users;

use crate::error::AppError;
use crate::AppState;
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(auth::router())
        .merge(users::router())
        .merge(payments::router())
        .merge(governance::router())
        .merge(tokenomics::router())
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    let db_health = state.store.ping().await;
    let ledger_health = state.ledger.ping().await;

    let status = if db_health && ledger_health {
        "healthy"
    } else {
        "unhealthy"
    };

    Json(json!({
        "status": status,
        "database": if db_health { "up" } else { "down" },
        "ledger": if ledger_health { "up" } else { "down" },
    }))
}

/// Extractor for privileged routes: `Authorization: Bearer <ADMIN_API_KEY>`.
/// Rejects everything while no key is configured.
pub struct AdminGuard;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminGuard {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_api_key.as_deref() else {
            warn!("Admin route {} called but ADMIN_API_KEY is not set", parts.uri.path());
            return Err(AppError::Unauthorized);
        };
        if bearer(&parts.headers) == Some(expected) {
            Ok(AdminGuard)
        } else {
            warn!("Rejected admin call to {}", parts.uri.path());
            Err(AppError::Unauthorized)
        }
    }
}

/// Extractor for wallet-scoped mutations: `Authorization: Bearer <token>`
/// from `/api/auth/verify`. Carries the signed-in wallet.
pub struct WalletAuth(pub String);

impl WalletAuth {
    /// Only the signed-in wallet may act as itself.
    pub fn require(&self, wallet: &str) -> Result<(), AppError> {
        if self.0 == wallet.trim() {
            Ok(())
        } else {
            warn!("{} tried to act as {}", self.0, wallet);
            Err(AppError::Unauthorized)
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for WalletAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer(&parts.headers) else {
            return Err(AppError::Unauthorized);
        };
        match state.auth.session(token, Utc::now()).await {
            Some(wallet) => Ok(WalletAuth(wallet)),
            None => {
                warn!("Expired or unknown session on {}", parts.uri.path());
                Err(AppError::Unauthorized)
            }
        }
    }
}

/// Provider callbacks carry the shared secret whenever one is configured.
fn check_webhook_secret(state: &AppState, headers: &HeaderMap, source: &str) -> Result<(), AppError> {
    if let Some(secret) = state.webhook_secret.as_deref() {
        if header(headers, WEBHOOK_SECRET_HEADER) != Some(secret) {
            warn!("{} callback with a bad or missing secret", source);
            return Err(AppError::Unauthorized);
        }
    }
    Ok(())
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    header(headers, "authorization")
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|h| !h.is_empty())
}
