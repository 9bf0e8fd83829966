// Runtime configuration for the RWA backend
//
// Process settings come from the environment (.env supported). Domain tables
// (governance, staking, fees) are immutable structs; an update swaps in a new
// struct through `ConfigHandle` instead of mutating fields in place.

use crate::models::{amount_str, PaymentType};
use anyhow::{anyhow, Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

const DAY_SECS: i64 = 86_400;
pub const MAX_VOTING_DAYS: u32 = 365;
/// Upper bound for the execution delay and for the execution window
pub const MAX_EXECUTION_SECS: i64 = 365 * DAY_SECS;
/// Whole tokens; keeps vote and quorum arithmetic far from u128 limits
pub const MAX_SUPPLY: u128 = 1_000_000_000_000_000_000_000_000_000_000;

/// Everything the server needs at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Bearer token accepted on privileged routes. Privileged routes are
    /// closed when unset.
    pub admin_api_key: Option<String>,
    /// Shared secret expected in `x-webhook-secret` on provider callbacks.
    pub webhook_secret: Option<String>,
    pub http_timeout: Duration,
    pub governance_tick: Duration,
    pub hedera: HederaConfig,
    pub stripe: StripeConfig,
    pub paypal: PaypalConfig,
    pub mobile_money: MobileMoneyConfig,
    pub didit: DiditConfig,
    pub ai_limits: AiUsageLimits,
    pub governance: GovernanceConfig,
    pub staking: StakingConfig,
    pub fees: FeeConfig,
    pub fee_allocation: FeeAllocationConfig,
}

#[derive(Debug, Clone)]
pub struct HederaConfig {
    pub relay_url: String,
    pub network: String,
    pub operator_id: String,
    pub treasury_account: String,
    pub escrow_account: String,
    /// Platform governance/utility token
    pub token_id: String,
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub api_base: String,
    pub secret_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PaypalConfig {
    pub api_base: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub return_url: String,
}

#[derive(Debug, Clone)]
pub struct MobileMoneyConfig {
    pub api_base: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DiditConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub workflow_id: String,
    pub callback_url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AiUsageLimits {
    pub daily: u32,
    pub monthly: u32,
}

impl Default for AiUsageLimits {
    fn default() -> Self {
        Self {
            daily: 50,
            monthly: 1_000,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let governance = GovernanceConfig {
            circulating_supply: env_parse_u128(
                "CIRCULATING_SUPPLY",
                GovernanceConfig::default().circulating_supply,
            )?,
            total_supply: env_parse_u128("TOTAL_SUPPLY", GovernanceConfig::default().total_supply)?,
            ..GovernanceConfig::default()
        };
        governance
            .validate()
            .map_err(|e| anyhow!("invalid governance config: {}", e))?;

        Ok(Self {
            port: env_parse("PORT", 4000)?,
            database_url: env_or("DATABASE_URL", "memory"),
            admin_api_key: env_opt("ADMIN_API_KEY"),
            webhook_secret: env_opt("WEBHOOK_SECRET"),
            http_timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS", 30)?),
            governance_tick: Duration::from_secs(env_parse("GOVERNANCE_TICK_SECS", 60)?),
            hedera: HederaConfig {
                relay_url: env_or("HEDERA_RELAY_URL", "http://localhost:3001"),
                network: env_or("HEDERA_NETWORK", "testnet"),
                operator_id: env_or("HEDERA_OPERATOR_ID", "0.0.2"),
                treasury_account: env_or("HEDERA_TREASURY_ACCOUNT", "0.0.2"),
                escrow_account: env_or("HEDERA_ESCROW_ACCOUNT", "0.0.2"),
                token_id: env_or("HEDERA_TOKEN_ID", "0.0.1001"),
            },
            stripe: StripeConfig {
                api_base: env_or("STRIPE_API_BASE", "https://api.stripe.com"),
                secret_key: env_opt("STRIPE_SECRET_KEY"),
            },
            paypal: PaypalConfig {
                api_base: env_or("PAYPAL_API_BASE", "https://api-m.sandbox.paypal.com"),
                client_id: env_opt("PAYPAL_CLIENT_ID"),
                client_secret: env_opt("PAYPAL_CLIENT_SECRET"),
                return_url: env_or("PAYPAL_RETURN_URL", "http://localhost:5173/payments/return"),
            },
            mobile_money: MobileMoneyConfig {
                api_base: env_or("MOBILE_MONEY_API_BASE", "http://localhost:3002"),
                api_key: env_opt("MOBILE_MONEY_API_KEY"),
            },
            didit: DiditConfig {
                api_base: env_or("DIDIT_API_BASE", "https://verification.didit.me"),
                api_key: env_opt("DIDIT_API_KEY"),
                workflow_id: env_or("DIDIT_WORKFLOW_ID", ""),
                callback_url: env_or("DIDIT_CALLBACK_URL", "http://localhost:4000/auth/didit/callback"),
            },
            ai_limits: AiUsageLimits {
                daily: env_parse("AI_DAILY_LIMIT", AiUsageLimits::default().daily)?,
                monthly: env_parse("AI_MONTHLY_LIMIT", AiUsageLimits::default().monthly)?,
            },
            governance,
            staking: StakingConfig::default(),
            fees: FeeConfig::default(),
            fee_allocation: FeeAllocationConfig::default(),
        })
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_opt(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value: {}", key, raw)),
        None => Ok(default),
    }
}

fn env_parse_u128(key: &str, default: u128) -> Result<u128> {
    env_parse(key, default)
}

// ============================================================================
// Domain configuration
// ============================================================================

/// Governance rules. Token figures are whole tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceConfig {
    #[serde(with = "amount_str")]
    pub proposal_threshold: u128,
    pub quorum_percentage: u32,
    pub default_voting_days: u32,
    pub min_voting_days: u32,
    pub max_voting_days: u32,
    pub execution_delay_secs: i64,
    /// How long a passed proposal stays executable after the delay.
    pub execution_window_secs: i64,
    #[serde(with = "amount_str")]
    pub circulating_supply: u128,
    #[serde(with = "amount_str")]
    pub total_supply: u128,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            proposal_threshold: 10_000,
            quorum_percentage: 20,
            default_voting_days: 7,
            min_voting_days: 1,
            max_voting_days: 30,
            execution_delay_secs: DAY_SECS,
            execution_window_secs: 14 * DAY_SECS,
            circulating_supply: 200_000_000,
            total_supply: 1_000_000_000,
        }
    }
}

impl GovernanceConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.quorum_percentage == 0 || self.quorum_percentage > 100 {
            return Err("quorumPercentage must be within 1..=100".into());
        }
        if self.min_voting_days == 0
            || self.min_voting_days > self.default_voting_days
            || self.default_voting_days > self.max_voting_days
        {
            return Err("voting days must satisfy 0 < min <= default <= max".into());
        }
        if self.max_voting_days > MAX_VOTING_DAYS {
            return Err(format!("maxVotingDays must be at most {}", MAX_VOTING_DAYS));
        }
        if self.execution_delay_secs < 0 || self.execution_window_secs <= 0 {
            return Err("execution delay/window must be non-negative/positive".into());
        }
        if self.execution_delay_secs > MAX_EXECUTION_SECS || self.execution_window_secs > MAX_EXECUTION_SECS {
            return Err(format!(
                "execution delay and window must be at most {} seconds",
                MAX_EXECUTION_SECS
            ));
        }
        if self.total_supply > MAX_SUPPLY {
            return Err(format!("totalSupply must be at most {}", MAX_SUPPLY));
        }
        if self.circulating_supply > self.total_supply {
            return Err("circulatingSupply exceeds totalSupply".into());
        }
        if self.proposal_threshold > self.total_supply {
            return Err("proposalThreshold exceeds totalSupply".into());
        }
        Ok(())
    }

    /// Minimum total voting weight for a result to be binding.
    pub fn quorum_required(&self) -> u128 {
        self.circulating_supply.saturating_mul(u128::from(self.quorum_percentage)) / 100
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StakingTier {
    pub lock_days: u32,
    pub apy_bps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StakingConfig {
    pub tiers: Vec<StakingTier>,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                StakingTier { lock_days: 30, apy_bps: 500 },
                StakingTier { lock_days: 90, apy_bps: 800 },
                StakingTier { lock_days: 180, apy_bps: 1_200 },
                StakingTier { lock_days: 365, apy_bps: 1_800 },
            ],
        }
    }
}

impl StakingConfig {
    pub fn tier(&self, lock_days: u32) -> Option<StakingTier> {
        self.tiers.iter().copied().find(|t| t.lock_days == lock_days)
    }
}

/// Fee rate per payment type, as a fraction of the amount.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeeConfig {
    pub rates: BTreeMap<PaymentType, Decimal>,
}

impl Default for FeeConfig {
    fn default() -> Self {
        let rates = BTreeMap::from([
            (PaymentType::TokenizationFee, Decimal::new(2, 2)),
            (PaymentType::VerificationFee, Decimal::new(1, 2)),
            (PaymentType::Investment, Decimal::new(1, 2)),
            (PaymentType::Escrow, Decimal::new(5, 3)),
            (PaymentType::Settlement, Decimal::new(5, 3)),
            (PaymentType::Refund, Decimal::ZERO),
            (PaymentType::PlatformFee, Decimal::ZERO),
        ]);
        Self { rates }
    }
}

impl FeeConfig {
    pub fn rate(&self, payment_type: PaymentType) -> Decimal {
        self.rates.get(&payment_type).copied().unwrap_or(Decimal::ZERO)
    }
}

/// Split of collected fees, in basis points. Must add up to 10_000.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeeAllocationConfig {
    pub treasury_bps: u32,
    pub stakers_bps: u32,
    pub burn_bps: u32,
    pub operations_bps: u32,
}

impl Default for FeeAllocationConfig {
    fn default() -> Self {
        Self {
            treasury_bps: 4_000,
            stakers_bps: 3_000,
            burn_bps: 2_000,
            operations_bps: 1_000,
        }
    }
}

impl FeeAllocationConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        let total = self.treasury_bps + self.stakers_bps + self.burn_bps + self.operations_bps;
        if total != 10_000 {
            return Err(format!("fee allocation must total 10000 bps, got {}", total));
        }
        Ok(())
    }
}

/// Shared, swappable configuration snapshot.
///
/// Readers take an `Arc` of the current value and keep a consistent view for
/// the whole request; `replace` installs a new value for later readers.
#[derive(Debug)]
pub struct ConfigHandle<T> {
    inner: RwLock<Arc<T>>,
}

impl<T> ConfigHandle<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(Arc::new(value)),
        }
    }

    pub fn current(&self) -> Arc<T> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn replace(&self, value: T) {
        *self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(value);
    }
}
