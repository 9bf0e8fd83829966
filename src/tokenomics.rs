// Fee revenue allocation and the platform token summary

use crate::config::{
    ConfigHandle, FeeAllocationConfig, FeeConfig, GovernanceConfig, StakingConfig, StakingTier,
};
use crate::error::AppError;
use crate::models::{amount_str, PaymentType};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Decimal places kept on each share before the remainder is assigned.
const SHARE_SCALE: u32 = 8;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RevenueDistribution {
    pub total: Decimal,
    pub treasury: Decimal,
    pub stakers: Decimal,
    pub burn: Decimal,
    pub operations: Decimal,
}

fn too_large() -> AppError {
    AppError::BadRequest("amount is too large".into())
}

fn share(amount: Decimal, bps: u32) -> Result<Decimal, AppError> {
    amount
        .checked_mul(Decimal::from(bps))
        .and_then(|v| v.checked_div(Decimal::from(10_000)))
        .map(|v| v.round_dp_with_strategy(SHARE_SCALE, RoundingStrategy::ToZero))
        .ok_or_else(too_large)
}

/// Splits `amount` by basis points. Rounding dust goes to the treasury so the
/// shares always add up to `amount`.
pub fn distribute_revenue(
    allocation: &FeeAllocationConfig,
    amount: Decimal,
) -> Result<RevenueDistribution, AppError> {
    if amount < Decimal::ZERO {
        return Err(AppError::BadRequest("amount must not be negative".into()));
    }
    allocation.validate().map_err(AppError::Internal)?;

    let stakers = share(amount, allocation.stakers_bps)?;
    let burn = share(amount, allocation.burn_bps)?;
    let operations = share(amount, allocation.operations_bps)?;
    let treasury = amount
        .checked_sub(stakers)
        .and_then(|v| v.checked_sub(burn))
        .and_then(|v| v.checked_sub(operations))
        .ok_or_else(too_large)?;
    Ok(RevenueDistribution {
        total: amount,
        treasury,
        stakers,
        burn,
        operations,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenomicsSummary {
    #[serde(with = "amount_str")]
    pub total_supply: u128,
    #[serde(with = "amount_str")]
    pub circulating_supply: u128,
    pub governance: GovernanceConfig,
    pub staking_tiers: Vec<StakingTier>,
    pub fee_rates: BTreeMap<PaymentType, Decimal>,
    pub fee_allocation: FeeAllocationConfig,
}

pub struct TokenomicsService {
    governance: Arc<ConfigHandle<GovernanceConfig>>,
    staking: Arc<StakingConfig>,
    fees: FeeConfig,
    allocation: FeeAllocationConfig,
}

impl TokenomicsService {
    pub fn new(
        governance: Arc<ConfigHandle<GovernanceConfig>>,
        staking: Arc<StakingConfig>,
        fees: FeeConfig,
        allocation: FeeAllocationConfig,
    ) -> Self {
        Self {
            governance,
            staking,
            fees,
            allocation,
        }
    }

    pub fn distribute(&self, amount: Decimal) -> Result<RevenueDistribution, AppError> {
        distribute_revenue(&self.allocation, amount)
    }

    pub fn summary(&self) -> TokenomicsSummary {
        let governance = self.governance.current();
        TokenomicsSummary {
            total_supply: governance.total_supply,
            circulating_supply: governance.circulating_supply,
            governance: governance.as_ref().clone(),
            staking_tiers: self.staking.tiers.clone(),
            fee_rates: self.fees.rates.clone(),
            fee_allocation: self.allocation,
        }
    }
}
