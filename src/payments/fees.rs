// Platform fee computation

use crate::config::FeeConfig;
use crate::error::AppError;
use crate::models::PaymentType;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

const TINYBARS_PER_HBAR: i64 = 100_000_000;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeeQuote {
    pub payment_type: PaymentType,
    pub amount: Decimal,
    pub fee_rate: Decimal,
    pub fee_amount: Decimal,
    pub net_amount: Decimal,
}

/// `fee = amount * rate`, `net = amount - fee`.
pub fn quote(fees: &FeeConfig, payment_type: PaymentType, amount: Decimal) -> Result<FeeQuote, AppError> {
    if amount <= Decimal::ZERO {
        return Err(AppError::BadRequest("amount must be positive".into()));
    }
    let fee_rate = fees.rate(payment_type);
    let fee_amount = amount
        .checked_mul(fee_rate)
        .ok_or_else(|| AppError::BadRequest("amount is too large".into()))?;

    Ok(FeeQuote {
        payment_type,
        amount,
        fee_rate,
        fee_amount,
        net_amount: amount - fee_amount,
    })
}

/// HBAR amount to tinybars. Fractions below one tinybar are rejected.
pub fn to_tinybars(hbar: Decimal) -> Result<u64, AppError> {
    let tinybars = hbar
        .checked_mul(Decimal::from(TINYBARS_PER_HBAR))
        .ok_or_else(|| AppError::BadRequest("HBAR amount is too large".into()))?;
    if !tinybars.fract().is_zero() {
        return Err(AppError::BadRequest(format!(
            "HBAR amount {} has more than 8 decimal places",
            hbar
        )));
    }
    tinybars
        .to_u64()
        .filter(|t| *t > 0)
        .ok_or_else(|| AppError::BadRequest(format!("invalid HBAR amount {}", hbar)))
}

/// Amount in minor currency units (cents), as card processors expect it.
/// Fractions of a cent are rejected.
pub fn to_minor_units(amount: Decimal) -> Result<i64, AppError> {
    if amount.normalize().scale() > 2 {
        return Err(AppError::BadRequest(format!(
            "amount {} has more than 2 decimal places",
            amount
        )));
    }
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|m| m.to_i64())
        .ok_or_else(|| AppError::BadRequest(format!("invalid amount {}", amount)))
}
