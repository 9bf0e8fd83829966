// User records keyed by wallet address

use crate::config::AiUsageLimits;
use crate::database::DynStore;
use crate::error::AppError;
use crate::ledger::Ledger;
use crate::models::{validate_wallet, User};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

const MAX_DISPLAY_NAME_LEN: usize = 64;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectWalletRequest {
    pub wallet_address: String,
}

/// Absent fields are left alone; an empty string clears the field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AiUsageReport {
    pub wallet_address: String,
    pub day: String,
    pub month: String,
    pub daily_used: u32,
    pub daily_limit: u32,
    pub monthly_used: u32,
    pub monthly_limit: u32,
}

impl AiUsageReport {
    fn new(user: &User, limits: AiUsageLimits, now: DateTime<Utc>) -> Self {
        let (day, month) = usage_keys(now);
        Self {
            wallet_address: user.wallet_address.clone(),
            daily_used: user.ai_usage.daily.get(&day).copied().unwrap_or(0),
            monthly_used: user.ai_usage.monthly.get(&month).copied().unwrap_or(0),
            daily_limit: limits.daily,
            monthly_limit: limits.monthly,
            day,
            month,
        }
    }
}

fn usage_keys(now: DateTime<Utc>) -> (String, String) {
    (now.format("%Y-%m-%d").to_string(), now.format("%Y-%m").to_string())
}

fn clean(value: Option<String>) -> Option<Option<String>> {
    value.map(|v| {
        let v = v.trim().to_string();
        (!v.is_empty()).then_some(v)
    })
}

fn validate_email(email: &str) -> Result<(), AppError> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.contains('@') && domain.contains('.') && !domain.starts_with('.')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("invalid email: {}", email)))
    }
}

pub struct UserService {
    store: DynStore,
    ledger: Arc<dyn Ledger>,
    token_id: String,
    ai_limits: AiUsageLimits,
}

impl UserService {
    pub fn new(store: DynStore, ledger: Arc<dyn Ledger>, token_id: String, ai_limits: AiUsageLimits) -> Self {
        Self {
            store,
            ledger,
            token_id,
            ai_limits,
        }
    }

    /// Get-or-create on first wallet interaction.
    pub async fn connect_wallet(&self, wallet: &str, now: DateTime<Utc>) -> Result<User, AppError> {
        validate_wallet(wallet)?;
        let user = self.store.create_user(&User::new(wallet, now)).await?;
        if user.created_at == now {
            info!("Users: new wallet connected {}", wallet);
        }
        Ok(user)
    }

    pub async fn get_user(&self, wallet: &str) -> Result<User, AppError> {
        validate_wallet(wallet)?;
        self.store
            .get_user(wallet)
            .await?
            .ok_or_else(|| AppError::not_found(format!("user {}", wallet)))
    }

    pub async fn update_profile(
        &self,
        wallet: &str,
        req: UpdateProfileRequest,
        now: DateTime<Utc>,
    ) -> Result<User, AppError> {
        validate_wallet(wallet)?;
        let display_name = clean(req.display_name);
        let email = clean(req.email).map(|e| e.map(|e| e.to_lowercase()));
        let country = clean(req.country).map(|c| c.map(|c| c.to_uppercase()));

        if let Some(Some(name)) = &display_name {
            if name.chars().count() > MAX_DISPLAY_NAME_LEN {
                return Err(AppError::BadRequest(format!(
                    "displayName must be at most {} characters",
                    MAX_DISPLAY_NAME_LEN
                )));
            }
        }
        if let Some(Some(email)) = &email {
            validate_email(email)?;
        }
        if let Some(Some(country)) = &country {
            if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(AppError::BadRequest(format!(
                    "country must be an ISO 3166 alpha-2 code, got {}",
                    country
                )));
            }
        }

        self.store
            .update_user(
                wallet,
                Box::new(move |user: &mut User| {
                    if let Some(v) = display_name {
                        user.display_name = v;
                    }
                    if let Some(v) = email {
                        user.email = v;
                    }
                    if let Some(v) = country {
                        user.country = v;
                    }
                    user.updated_at = now;
                    Ok(())
                }),
            )
            .await
    }

    /// Refreshes `trust_balance` from the ledger. Staked tokens still sit in
    /// the wallet on-chain, so they are subtracted from the liquid balance.
    /// Claimed staking rewards are paid out on-chain and survive a sync;
    /// unclaimed ones live in `staking_rewards` and are not touched.
    pub async fn sync_balance(&self, wallet: &str, now: DateTime<Utc>) -> Result<User, AppError> {
        self.get_user(wallet).await?;
        let on_chain = self.ledger.token_balance(&self.token_id, wallet).await?;

        let user = self
            .store
            .update_user(
                wallet,
                Box::new(move |user: &mut User| {
                    user.trust_balance = on_chain.saturating_sub(user.staking_balance);
                    user.updated_at = now;
                    Ok(())
                }),
            )
            .await?;
        info!(
            "Users: synced {} balance {} (staked {})",
            wallet, user.trust_balance, user.staking_balance
        );
        Ok(user)
    }

    /// Counts one AI query against the daily and monthly limits.
    pub async fn record_ai_usage(&self, wallet: &str, now: DateTime<Utc>) -> Result<AiUsageReport, AppError> {
        self.connect_wallet(wallet, now).await?;
        let limits = self.ai_limits;
        let (day, month) = usage_keys(now);

        let user = self
            .store
            .update_user(
                wallet,
                Box::new(move |user: &mut User| {
                    let daily = user.ai_usage.daily.get(&day).copied().unwrap_or(0);
                    let monthly = user.ai_usage.monthly.get(&month).copied().unwrap_or(0);
                    if daily >= limits.daily {
                        return Err(AppError::LimitExceeded(format!(
                            "daily AI query limit of {} reached",
                            limits.daily
                        )));
                    }
                    if monthly >= limits.monthly {
                        return Err(AppError::LimitExceeded(format!(
                            "monthly AI query limit of {} reached",
                            limits.monthly
                        )));
                    }
                    // Only the current month's days are worth keeping
                    user.ai_usage.daily.retain(|k, _| k.starts_with(month.as_str()));
                    user.ai_usage.daily.insert(day, daily + 1);
                    user.ai_usage.monthly.insert(month, monthly + 1);
                    user.updated_at = now;
                    Ok(())
                }),
            )
            .await?;

        Ok(AiUsageReport::new(&user, limits, now))
    }

    pub async fn ai_usage(&self, wallet: &str, now: DateTime<Utc>) -> Result<AiUsageReport, AppError> {
        let user = self.get_user(wallet).await?;
        Ok(AiUsageReport::new(&user, self.ai_limits, now))
    }
}
