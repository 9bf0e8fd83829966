// KYC sessions delegated to Didit

use crate::config::DiditConfig;
use crate::database::DynStore;
use crate::error::AppError;
use crate::models::{validate_wallet, KycStatus, User};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KycSession {
    pub session_id: String,
    /// Where the user completes verification
    pub url: String,
}

#[async_trait::async_trait]
pub trait KycProvider: Send + Sync {
    async fn create_session(&self, wallet: &str) -> Result<KycSession, AppError>;
}

pub struct DiditClient {
    http: Client,
    api_base: String,
    api_key: Option<String>,
    workflow_id: String,
    callback_url: String,
}

#[derive(Debug, Deserialize)]
struct DiditSession {
    session_id: String,
    url: String,
}

impl DiditClient {
    pub fn new(http: Client, config: &DiditConfig) -> Self {
        Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            workflow_id: config.workflow_id.clone(),
            callback_url: config.callback_url.clone(),
        }
    }
}

#[async_trait::async_trait]
impl KycProvider for DiditClient {
    async fn create_session(&self, wallet: &str) -> Result<KycSession, AppError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::Provider("didit is not configured".into()))?;

        let response = self
            .http
            .post(format!("{}/v2/session/", self.api_base))
            .header("x-api-key", api_key)
            .json(&json!({
                "workflow_id": self.workflow_id,
                "vendor_data": wallet,
                "callback": self.callback_url,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Didit: session creation failed with {}: {}", status, body);
            return Err(AppError::Provider(format!("didit returned {}", status)));
        }

        let session: DiditSession = response.json().await?;
        Ok(KycSession {
            session_id: session.session_id,
            url: session.url,
        })
    }
}

/// Decision reported by the provider. `vendor_data` carries the wallet.
#[derive(Debug, Clone, Deserialize)]
pub struct KycCallback {
    #[serde(alias = "verificationSessionId")]
    pub session_id: String,
    pub status: String,
    pub vendor_data: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KycStatusView {
    pub wallet_address: String,
    pub status: KycStatus,
}

impl From<&User> for KycStatusView {
    fn from(user: &User) -> Self {
        Self {
            wallet_address: user.wallet_address.clone(),
            status: user.kyc_status,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KycStart {
    pub session_id: String,
    pub url: String,
    pub status: KycStatus,
}

/// Provider status to KYC status; anything undecided stays in progress.
pub fn decision(status: &str) -> KycStatus {
    match status {
        "Approved" => KycStatus::Approved,
        "Declined" => KycStatus::Rejected,
        _ => KycStatus::InProgress,
    }
}

pub struct KycService {
    store: DynStore,
    provider: Arc<dyn KycProvider>,
}

impl KycService {
    pub fn new(store: DynStore, provider: Arc<dyn KycProvider>) -> Self {
        Self { store, provider }
    }

    pub async fn start_verification(&self, wallet: &str, now: DateTime<Utc>) -> Result<KycStart, AppError> {
        validate_wallet(wallet)?;
        let user = self.store.create_user(&User::new(wallet, now)).await?;
        if !user.kyc_status.can_transition_to(KycStatus::InProgress) {
            return Err(AppError::Conflict(format!(
                "KYC for {} is already {}",
                wallet, user.kyc_status
            )));
        }

        let session = self.provider.create_session(wallet).await?;
        let session_id = session.session_id.clone();
        self.store
            .update_user(
                wallet,
                Box::new(move |user: &mut User| {
                    if !user.kyc_status.can_transition_to(KycStatus::InProgress) {
                        return Err(AppError::Conflict(format!(
                            "KYC for {} is already {}",
                            user.wallet_address, user.kyc_status
                        )));
                    }
                    user.kyc_status = KycStatus::InProgress;
                    user.kyc_session_id = Some(session_id);
                    user.updated_at = now;
                    Ok(())
                }),
            )
            .await?;

        info!("KYC: session {} started for {}", session.session_id, wallet);
        Ok(KycStart {
            session_id: session.session_id,
            url: session.url,
            status: KycStatus::InProgress,
        })
    }

    /// Applies a provider decision. Callbacks for a stale session or that
    /// would move a final decision are acknowledged without change.
    pub async fn handle_callback(&self, callback: KycCallback, now: DateTime<Utc>) -> Result<KycStatusView, AppError> {
        let wallet = callback
            .vendor_data
            .clone()
            .ok_or_else(|| AppError::BadRequest("callback is missing vendor_data".into()))?;
        let user = self
            .store
            .get_user(&wallet)
            .await?
            .ok_or_else(|| AppError::not_found(format!("user {}", wallet)))?;

        if user.kyc_session_id.as_deref() != Some(callback.session_id.as_str()) {
            warn!(
                "KYC: callback for session {} does not match {}'s current session",
                callback.session_id, wallet
            );
            return Ok(KycStatusView::from(&user));
        }

        let next = decision(&callback.status);
        if next == user.kyc_status || !user.kyc_status.can_transition_to(next) {
            if next != user.kyc_status {
                warn!(
                    "KYC: ignoring {} -> {} for {}",
                    user.kyc_status, next, wallet
                );
            }
            return Ok(KycStatusView::from(&user));
        }

        let session_id = callback.session_id.clone();
        let updated = self
            .store
            .update_user(
                &wallet,
                Box::new(move |user: &mut User| {
                    if user.kyc_session_id.as_deref() == Some(session_id.as_str())
                        && user.kyc_status.can_transition_to(next)
                    {
                        user.kyc_status = next;
                        user.updated_at = now;
                    }
                    Ok(())
                }),
            )
            .await?;

        info!(
            "KYC: {} is now {} (provider status {})",
            wallet, updated.kyc_status, callback.status
        );
        Ok(KycStatusView::from(&updated))
    }

    pub async fn status(&self, wallet: &str) -> Result<KycStatusView, AppError> {
        validate_wallet(wallet)?;
        let user = self
            .store
            .get_user(wallet)
            .await?
            .ok_or_else(|| AppError::not_found(format!("user {}", wallet)))?;
        Ok(KycStatusView::from(&user))
    }
}
