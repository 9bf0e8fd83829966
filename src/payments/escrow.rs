// HBAR escrow: buyer funds are held on the escrow account until released or refunded

use super::{fees, PaymentService};
use crate::error::AppError;
use crate::models::{
    validate_wallet, Payment, PaymentMethod, PaymentStatus, PaymentType, PaymentUpdate, User,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEscrowRequest {
    pub buyer: String,
    pub seller: String,
    /// HBAR
    pub amount: Decimal,
    pub description: Option<String>,
}

impl PaymentService {
    /// Moves the buyer's HBAR onto the escrow account. A held escrow is PROCESSING.
    pub async fn create_escrow(
        &self,
        req: CreateEscrowRequest,
        idempotency_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Payment, AppError> {
        validate_wallet(&req.buyer)?;
        validate_wallet(&req.seller)?;
        if req.buyer == req.seller {
            return Err(AppError::BadRequest("buyer and seller must differ".into()));
        }
        let quote = self.quote_fee(PaymentType::Escrow, req.amount)?;
        let tinybars = fees::to_tinybars(quote.amount)?;
        // The seller's share must also be a whole number of tinybars
        fees::to_tinybars(quote.net_amount)?;

        if let Some(existing) = self.find_idempotent(&req.buyer, idempotency_key).await? {
            return Ok(existing);
        }
        self.store.create_user(&User::new(&req.buyer, now)).await?;

        let payment = Payment {
            id: Uuid::new_v4(),
            user_id: req.buyer,
            amount: quote.amount,
            currency: "HBAR".into(),
            method: PaymentMethod::Hbar,
            payment_type: PaymentType::Escrow,
            status: PaymentStatus::Pending,
            fee_amount: quote.fee_amount,
            net_amount: quote.net_amount,
            provider_reference: None,
            checkout_url: None,
            transaction_id: None,
            seller_wallet: Some(req.seller),
            idempotency_key: idempotency_key.map(str::to_string),
            failure_reason: None,
            description: req.description,
            created_at: now,
            updated_at: now,
            settlement_claimed_at: None,
        };
        if let Some(existing) = self.insert_or_replay(&payment).await? {
            return Ok(existing);
        }

        let receipt = match self
            .ledger
            .transfer_hbar(&payment.user_id, &self.escrow_account, tinybars)
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => return Err(self.fail(&payment, PaymentStatus::Pending, e, now).await),
        };

        info!(
            "Escrow: {} holds {} HBAR from {} for {:?}",
            payment.id, payment.amount, payment.user_id, payment.seller_wallet
        );
        let update = PaymentUpdate {
            transaction_id: Some(receipt.transaction_id),
            ..PaymentUpdate::status(PaymentStatus::Processing)
        };
        self.advance(payment.id, PaymentStatus::Pending, &update, now).await
    }

    /// Buyer confirms delivery: the seller receives `net_amount`, the fee stays on escrow.
    pub async fn release_escrow(&self, id: Uuid, buyer: &str, now: DateTime<Utc>) -> Result<Payment, AppError> {
        let payment = self.held_escrow(id).await?;
        if payment.user_id != buyer {
            return Err(AppError::Unauthorized);
        }
        let seller = payment
            .seller_wallet
            .clone()
            .ok_or_else(|| AppError::Internal(format!("escrow {} has no seller", id)))?;
        let tinybars = fees::to_tinybars(payment.net_amount)?;

        self.settle(&payment, PaymentStatus::Completed, &seller, tinybars, now)
            .await
    }

    /// Admin refund of the full amount back to the buyer.
    pub async fn refund_escrow(&self, id: Uuid, now: DateTime<Utc>) -> Result<Payment, AppError> {
        let payment = self.held_escrow(id).await?;
        let tinybars = fees::to_tinybars(payment.amount)?;

        self.settle(&payment, PaymentStatus::Refunded, &payment.user_id, tinybars, now)
            .await
    }

    async fn held_escrow(&self, id: Uuid) -> Result<Payment, AppError> {
        let payment = self.get_payment(id).await?;
        if payment.payment_type != PaymentType::Escrow {
            return Err(AppError::BadRequest(format!("payment {} is not an escrow", id)));
        }
        if payment.status != PaymentStatus::Processing {
            return Err(AppError::Conflict(format!(
                "escrow {} is {} and holds no funds",
                id, payment.status
            )));
        }
        Ok(payment)
    }

    /// Takes the settlement claim before any funds move, so only one release
    /// or refund reaches the ledger. The terminal status is written only once
    /// the transfer has gone through; a failed transfer drops the claim.
    async fn settle(
        &self,
        payment: &Payment,
        target: PaymentStatus,
        recipient: &str,
        tinybars: u64,
        now: DateTime<Utc>,
    ) -> Result<Payment, AppError> {
        if self.store.claim_settlement(payment.id, now).await?.is_none() {
            return Err(AppError::Conflict(format!(
                "escrow {} is already being settled",
                payment.id
            )));
        }

        let receipt = match self
            .ledger
            .transfer_hbar(&self.escrow_account, recipient, tinybars)
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                error!("Escrow: settling {} as {} failed: {}", payment.id, target, e);
                self.store.release_settlement(payment.id).await?;
                return Err(e);
            }
        };

        info!("Escrow: {} {} in {}", payment.id, target, receipt.transaction_id);
        let update = PaymentUpdate {
            transaction_id: Some(receipt.transaction_id.clone()),
            ..PaymentUpdate::status(target)
        };
        // The claim stays in place if this write fails, so the funds cannot move twice
        self.store
            .complete_settlement(payment.id, &update, now)
            .await
            .map_err(|e| {
                error!(
                    "Escrow: {} settled on ledger as {} but recording failed: {}",
                    payment.id, receipt.transaction_id, e
                );
                e
            })
    }
}
