// Token staking with fixed lock tiers

use crate::config::{StakingConfig, StakingTier};
use crate::database::DynStore;
use crate::error::AppError;
use crate::ledger::Ledger;
use crate::models::{amount_str, validate_wallet, User};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

const SECONDS_PER_YEAR: u128 = 365 * 86_400;
const BPS: u128 = 10_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeRequest {
    pub wallet_address: String,
    #[serde(with = "amount_str")]
    pub amount: u128,
    pub lock_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRequest {
    pub wallet_address: String,
}

/// A user's stake, rebuilt from the staking fields on the user record.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StakingPosition {
    pub wallet_address: String,
    #[serde(with = "amount_str")]
    pub amount: u128,
    pub lock_days: Option<u32>,
    pub apy_bps: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub unlocks_at: Option<DateTime<Utc>>,
    pub unlocked: bool,
    /// Settled plus still accruing rewards
    #[serde(with = "amount_str")]
    pub rewards: u128,
    #[serde(with = "amount_str")]
    pub liquid_balance: u128,
}

/// `amount * apy_bps * elapsed / (10_000 * year)`, truncated.
pub fn accrued_rewards(
    amount: u128,
    apy_bps: u32,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<u128, AppError> {
    let elapsed = (to - from).num_seconds().max(0) as u128;
    amount
        .checked_mul(u128::from(apy_bps))
        .and_then(|v| v.checked_mul(elapsed))
        .map(|v| v / (BPS * SECONDS_PER_YEAR))
        .ok_or_else(|| AppError::Internal("staking reward overflow".into()))
}

fn unlock_time(user: &User) -> Option<DateTime<Utc>> {
    Some(user.staking_started_at? + Duration::days(i64::from(user.staking_lock_days?)))
}

/// Moves rewards accrued since the checkpoint into `staking_rewards`.
fn settle(user: &mut User, tier: Option<StakingTier>, now: DateTime<Utc>) -> Result<(), AppError> {
    if let (Some(tier), Some(checkpoint)) = (tier, user.staking_checkpoint) {
        let accrued = accrued_rewards(user.staking_balance, tier.apy_bps, checkpoint, now)?;
        user.staking_rewards = user
            .staking_rewards
            .checked_add(accrued)
            .ok_or_else(|| AppError::Internal("staking reward overflow".into()))?;
    }
    user.staking_checkpoint = Some(now);
    Ok(())
}

pub struct StakingService {
    store: DynStore,
    ledger: Arc<dyn Ledger>,
    config: Arc<StakingConfig>,
    token_id: String,
    /// Rewards are paid from here
    treasury_account: String,
}

impl StakingService {
    pub fn new(
        store: DynStore,
        ledger: Arc<dyn Ledger>,
        config: Arc<StakingConfig>,
        token_id: String,
        treasury_account: String,
    ) -> Self {
        Self {
            store,
            ledger,
            config,
            token_id,
            treasury_account,
        }
    }

    pub fn tiers(&self) -> &[StakingTier] {
        &self.config.tiers
    }

    fn tier_of(&self, user: &User) -> Option<StakingTier> {
        user.staking_lock_days.and_then(|d| self.config.tier(d))
    }

    pub async fn position(&self, wallet: &str, now: DateTime<Utc>) -> Result<StakingPosition, AppError> {
        validate_wallet(wallet)?;
        let user = self
            .store
            .get_user(wallet)
            .await?
            .ok_or_else(|| AppError::not_found(format!("user {}", wallet)))?;
        self.view(&user, now)
    }

    fn view(&self, user: &User, now: DateTime<Utc>) -> Result<StakingPosition, AppError> {
        let tier = self.tier_of(user);
        let pending = match (tier, user.staking_checkpoint) {
            (Some(tier), Some(checkpoint)) => {
                accrued_rewards(user.staking_balance, tier.apy_bps, checkpoint, now)?
            }
            _ => 0,
        };
        let unlocks_at = unlock_time(user);
        Ok(StakingPosition {
            wallet_address: user.wallet_address.clone(),
            amount: user.staking_balance,
            lock_days: user.staking_lock_days,
            apy_bps: tier.map(|t| t.apy_bps),
            started_at: user.staking_started_at,
            unlocks_at,
            unlocked: unlocks_at.map_or(true, |t| now >= t),
            rewards: user.staking_rewards.saturating_add(pending),
            liquid_balance: user.trust_balance,
        })
    }

    /// Locks `amount` liquid tokens. Adding to a position needs the same
    /// tier and restarts its lock.
    pub async fn stake(&self, req: StakeRequest, now: DateTime<Utc>) -> Result<StakingPosition, AppError> {
        validate_wallet(&req.wallet_address)?;
        if req.amount == 0 {
            return Err(AppError::BadRequest("amount must be positive".into()));
        }
        let tier = self.config.tier(req.lock_days).ok_or_else(|| {
            AppError::BadRequest(format!("no staking tier with a {}-day lock", req.lock_days))
        })?;
        let amount = req.amount;

        let user = self
            .store
            .update_user(
                &req.wallet_address,
                Box::new(move |user: &mut User| {
                    if user.trust_balance < amount {
                        return Err(AppError::BadRequest(format!(
                            "insufficient balance: {} available, {} requested",
                            user.trust_balance, amount
                        )));
                    }
                    if user.staking_balance > 0 {
                        if user.staking_lock_days != Some(tier.lock_days) {
                            return Err(AppError::Conflict(format!(
                                "existing stake uses a {:?}-day lock",
                                user.staking_lock_days
                            )));
                        }
                        settle(user, Some(tier), now)?;
                    } else {
                        user.staking_checkpoint = Some(now);
                    }
                    user.trust_balance -= amount;
                    user.staking_balance = user
                        .staking_balance
                        .checked_add(amount)
                        .ok_or_else(|| AppError::Internal("staking balance overflow".into()))?;
                    user.staking_lock_days = Some(tier.lock_days);
                    user.staking_started_at = Some(now);
                    user.updated_at = now;
                    Ok(())
                }),
            )
            .await?;

        info!(
            "Staking: {} staked {} for {} days (total {})",
            user.wallet_address, amount, tier.lock_days, user.staking_balance
        );
        self.view(&user, now)
    }

    /// Returns the principal once the lock has passed. Accrued rewards are
    /// settled and stay claimable.
    pub async fn unstake(&self, wallet: &str, now: DateTime<Utc>) -> Result<StakingPosition, AppError> {
        validate_wallet(wallet)?;
        let config = self.config.clone();

        let user = self
            .store
            .update_user(
                wallet,
                Box::new(move |user: &mut User| {
                    if user.staking_balance == 0 {
                        return Err(AppError::BadRequest("nothing is staked".into()));
                    }
                    if let Some(unlocks_at) = unlock_time(user) {
                        if now < unlocks_at {
                            return Err(AppError::BadRequest(format!(
                                "stake is locked until {}",
                                unlocks_at
                            )));
                        }
                    }
                    let tier = user.staking_lock_days.and_then(|d| config.tier(d));
                    settle(user, tier, now)?;
                    user.trust_balance = user
                        .trust_balance
                        .checked_add(user.staking_balance)
                        .ok_or_else(|| AppError::Internal("balance overflow".into()))?;
                    user.staking_balance = 0;
                    user.staking_lock_days = None;
                    user.staking_started_at = None;
                    user.staking_checkpoint = None;
                    user.updated_at = now;
                    Ok(())
                }),
            )
            .await?;

        info!("Staking: {} unstaked", wallet);
        self.view(&user, now)
    }

    /// Pays settled and accrued rewards from the treasury to the wallet on
    /// the ledger and into the liquid balance. The rewards are taken off the
    /// record first so they cannot be paid twice; a failed transfer puts them back.
    pub async fn claim_rewards(&self, wallet: &str, now: DateTime<Utc>) -> Result<StakingPosition, AppError> {
        validate_wallet(wallet)?;
        let config = self.config.clone();
        let (claimed_tx, claimed_rx) = oneshot::channel();

        let user = self
            .store
            .update_user(
                wallet,
                Box::new(move |user: &mut User| {
                    if user.staking_balance > 0 {
                        let tier = user.staking_lock_days.and_then(|d| config.tier(d));
                        settle(user, tier, now)?;
                    }
                    if user.staking_rewards == 0 {
                        return Err(AppError::BadRequest("no rewards to claim".into()));
                    }
                    user.trust_balance = user
                        .trust_balance
                        .checked_add(user.staking_rewards)
                        .ok_or_else(|| AppError::Internal("balance overflow".into()))?;
                    let _ = claimed_tx.send(user.staking_rewards);
                    user.staking_rewards = 0;
                    user.updated_at = now;
                    Ok(())
                }),
            )
            .await?;
        let claimed = claimed_rx
            .await
            .map_err(|_| AppError::Internal("claimed amount was not recorded".into()))?;

        match self
            .ledger
            .transfer_token(&self.token_id, &self.treasury_account, wallet, claimed)
            .await
        {
            Ok(receipt) => {
                info!(
                    "Staking: {} claimed {} rewards in {}",
                    wallet, claimed, receipt.transaction_id
                );
                self.view(&user, now)
            }
            Err(e) => {
                warn!("Staking: paying {} rewards to {} failed: {}", claimed, wallet, e);
                self.restore_rewards(wallet, claimed, now).await;
                Err(e)
            }
        }
    }

    async fn restore_rewards(&self, wallet: &str, claimed: u128, now: DateTime<Utc>) {
        let restored = self
            .store
            .update_user(
                wallet,
                Box::new(move |user: &mut User| {
                    user.staking_rewards = user
                        .staking_rewards
                        .checked_add(claimed)
                        .ok_or_else(|| AppError::Internal("staking reward overflow".into()))?;
                    user.trust_balance = user.trust_balance.saturating_sub(claimed);
                    user.updated_at = now;
                    Ok(())
                }),
            )
            .await;
        if let Err(e) = restored {
            error!("Staking: could not restore {} rewards for {}: {}", claimed, wallet, e);
        }
    }
}
