// Payments: fee computation, method dispatch, provider webhooks and escrow

mod escrow;
pub mod fees;
pub mod providers;
pub mod webhooks;

pub use escrow::CreateEscrowRequest;
pub use fees::FeeQuote;
pub use providers::{MobileMoneyRail, PaymentContext, PaymentRail, PaypalRail, StripeRail};

use crate::config::FeeConfig;
use crate::database::DynStore;
use crate::error::AppError;
use crate::ledger::Ledger;
use crate::models::{
    validate_wallet, Payment, PaymentMethod, PaymentStatus, PaymentType, PaymentUpdate, User,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use webhooks::{WebhookEvent, WebhookProvider};

const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub user_id: String,
    pub amount: Decimal,
    pub currency: Option<String>,
    pub method: PaymentMethod,
    pub payment_type: PaymentType,
    pub description: Option<String>,
    pub phone_number: Option<String>,
    pub return_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookReceipt {
    pub received: bool,
    /// False when the event was ignored
    pub handled: bool,
    pub payment_id: Option<Uuid>,
}

impl WebhookReceipt {
    fn ignored() -> Self {
        Self {
            received: true,
            handled: false,
            payment_id: None,
        }
    }
}

pub struct PaymentService {
    store: DynStore,
    ledger: Arc<dyn Ledger>,
    rails: HashMap<PaymentMethod, Arc<dyn PaymentRail>>,
    fees: FeeConfig,
    treasury_account: String,
    escrow_account: String,
}

impl PaymentService {
    pub fn new(
        store: DynStore,
        ledger: Arc<dyn Ledger>,
        fees: FeeConfig,
        treasury_account: String,
        escrow_account: String,
    ) -> Self {
        Self {
            store,
            ledger,
            rails: HashMap::new(),
            fees,
            treasury_account,
            escrow_account,
        }
    }

    pub fn with_rail(mut self, rail: Arc<dyn PaymentRail>) -> Self {
        self.rails.insert(rail.method(), rail);
        self
    }

    pub fn quote_fee(&self, payment_type: PaymentType, amount: Decimal) -> Result<FeeQuote, AppError> {
        fees::quote(&self.fees, payment_type, amount)
    }

    pub async fn create_payment(
        &self,
        req: CreatePaymentRequest,
        idempotency_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Payment, AppError> {
        validate_wallet(&req.user_id)?;
        if req.payment_type == PaymentType::Escrow {
            return Err(AppError::BadRequest(
                "escrow payments are created through the escrow endpoint".into(),
            ));
        }
        let quote = self.quote_fee(req.payment_type, req.amount)?;
        let currency = normalize_currency(req.method, req.currency.as_deref())?;
        let tinybars = match req.method {
            PaymentMethod::Hbar => Some(fees::to_tinybars(req.amount)?),
            _ => {
                // Fiat rails charge whole cents
                fees::to_minor_units(req.amount)?;
                None
            }
        };
        if req.method == PaymentMethod::MobileMoney && req.phone_number.is_none() {
            return Err(AppError::BadRequest("phoneNumber is required for MOBILE_MONEY".into()));
        }

        if let Some(existing) = self.find_idempotent(&req.user_id, idempotency_key).await? {
            info!("Payments: replaying {} for idempotency key", existing.id);
            return Ok(existing);
        }

        self.store.create_user(&User::new(&req.user_id, now)).await?;

        let payment = Payment {
            id: Uuid::new_v4(),
            user_id: req.user_id,
            amount: quote.amount,
            currency,
            method: req.method,
            payment_type: req.payment_type,
            status: PaymentStatus::Pending,
            fee_amount: quote.fee_amount,
            net_amount: quote.net_amount,
            provider_reference: None,
            checkout_url: None,
            transaction_id: None,
            seller_wallet: None,
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
        info!(
            "Payments: created {} ({} {} via {}, fee {})",
            payment.id, payment.amount, payment.currency, payment.method, payment.fee_amount
        );

        let update = match payment.method {
            PaymentMethod::Hbar => {
                let tinybars = tinybars.unwrap_or_default();
                match self
                    .ledger
                    .transfer_hbar(&payment.user_id, &self.treasury_account, tinybars)
                    .await
                {
                    Ok(receipt) => PaymentUpdate {
                        transaction_id: Some(receipt.transaction_id),
                        ..PaymentUpdate::status(PaymentStatus::Completed)
                    },
                    Err(e) => return Err(self.fail(&payment, PaymentStatus::Pending, e, now).await),
                }
            }
            PaymentMethod::BankTransfer => PaymentUpdate::status(PaymentStatus::Processing),
            method => {
                let ctx = PaymentContext {
                    phone_number: req.phone_number,
                    return_url: req.return_url,
                };
                let outcome = match self.rails.get(&method) {
                    Some(rail) => rail.initiate(&payment, &ctx).await,
                    None => Err(AppError::Provider(format!("{} is not available", method))),
                };
                match outcome {
                    Ok(outcome) => PaymentUpdate {
                        provider_reference: Some(outcome.provider_reference),
                        checkout_url: outcome.checkout_url,
                        ..PaymentUpdate::status(outcome.status)
                    },
                    Err(e) => return Err(self.fail(&payment, PaymentStatus::Pending, e, now).await),
                }
            }
        };

        self.advance(payment.id, PaymentStatus::Pending, &update, now).await
    }

    pub async fn get_payment(&self, id: Uuid) -> Result<Payment, AppError> {
        self.store
            .get_payment(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("payment {}", id)))
    }

    pub async fn list_user_payments(&self, user_id: &str) -> Result<Vec<Payment>, AppError> {
        validate_wallet(user_id)?;
        self.store.list_payments(user_id).await
    }

    /// PENDING/PROCESSING to CANCELLED, by the payer. Held escrow must be refunded instead.
    pub async fn cancel_payment(&self, id: Uuid, wallet: &str, now: DateTime<Utc>) -> Result<Payment, AppError> {
        let payment = self.get_payment(id).await?;
        if payment.user_id != wallet {
            return Err(AppError::Unauthorized);
        }
        if payment.payment_type == PaymentType::Escrow && payment.status == PaymentStatus::Processing {
            return Err(AppError::Conflict(format!(
                "escrow {} holds funds and must be refunded",
                id
            )));
        }
        if !payment.status.can_transition_to(PaymentStatus::Cancelled) {
            return Err(AppError::Conflict(format!(
                "payment {} is {} and cannot be cancelled",
                id, payment.status
            )));
        }

        let cancelled = self
            .store
            .transition_payment(id, payment.status, &PaymentUpdate::status(PaymentStatus::Cancelled), now)
            .await?
            .ok_or_else(|| AppError::Conflict(format!("payment {} changed while cancelling", id)))?;
        info!("Payments: {} cancelled by {}", id, wallet);
        Ok(cancelled)
    }

    /// Applies a provider status callback. Unknown providers, unknown events,
    /// payments made through another method, escrows and illegal transitions
    /// are logged and acknowledged without change.
    pub async fn handle_webhook(
        &self,
        provider: &str,
        payload: &Value,
        now: DateTime<Utc>,
    ) -> Result<WebhookReceipt, AppError> {
        let Some(kind) = WebhookProvider::from_path(provider) else {
            warn!("Payments: webhook from unknown provider '{}' ignored", provider);
            return Ok(WebhookReceipt::ignored());
        };
        let Some(event) = webhooks::parse(kind, payload) else {
            info!("Payments: {} webhook without a status change ignored", provider);
            return Ok(WebhookReceipt::ignored());
        };

        let Some(payment) = self.resolve_webhook_payment(&event).await? else {
            warn!(
                "Payments: {} webhook for unknown payment (id={:?}, ref={:?})",
                provider, event.payment_id, event.provider_reference
            );
            return Ok(WebhookReceipt::ignored());
        };

        // Escrow funds only move through release or refund
        if payment.payment_type == PaymentType::Escrow || payment.method != kind.method() {
            warn!(
                "Payments: {} webhook for {} ({} {}) ignored",
                provider, payment.id, payment.method, payment.payment_type
            );
            return Ok(WebhookReceipt::ignored());
        }

        if payment.status == event.status {
            return Ok(WebhookReceipt {
                received: true,
                handled: true,
                payment_id: Some(payment.id),
            });
        }
        if !payment.status.can_transition_to(event.status) {
            warn!(
                "Payments: {} webhook tried {} -> {} on {}, ignored",
                provider, payment.status, event.status, payment.id
            );
            return Ok(WebhookReceipt::ignored());
        }

        let update = PaymentUpdate {
            provider_reference: event.provider_reference.clone(),
            failure_reason: event.failure_reason.clone(),
            ..PaymentUpdate::status(event.status)
        };
        let handled = self
            .store
            .transition_payment(payment.id, payment.status, &update, now)
            .await?
            .is_some();
        if handled {
            info!(
                "Payments: {} webhook moved {} from {} to {}",
                provider, payment.id, payment.status, event.status
            );
        } else {
            warn!("Payments: {} changed concurrently, webhook not applied", payment.id);
        }

        Ok(WebhookReceipt {
            received: true,
            handled,
            payment_id: Some(payment.id),
        })
    }

    async fn resolve_webhook_payment(&self, event: &WebhookEvent) -> Result<Option<Payment>, AppError> {
        if let Some(id) = event.payment_id {
            if let Some(payment) = self.store.get_payment(id).await? {
                return Ok(Some(payment));
            }
        }
        match &event.provider_reference {
            Some(reference) => self.store.find_payment_by_reference(reference).await,
            None => Ok(None),
        }
    }

    async fn find_idempotent(&self, user_id: &str, key: Option<&str>) -> Result<Option<Payment>, AppError> {
        let Some(key) = key else {
            return Ok(None);
        };
        if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(AppError::BadRequest(format!(
                "Idempotency-Key must be 1..={} characters",
                MAX_IDEMPOTENCY_KEY_LEN
            )));
        }
        self.store.find_payment_by_idempotency_key(user_id, key).await
    }

    /// Inserts `payment`; a concurrent request that won the same
    /// idempotency key gets its payment returned instead.
    async fn insert_or_replay(&self, payment: &Payment) -> Result<Option<Payment>, AppError> {
        match self.store.insert_payment(payment).await {
            Ok(()) => Ok(None),
            Err(AppError::Conflict(msg)) => match &payment.idempotency_key {
                Some(key) => self
                    .store
                    .find_payment_by_idempotency_key(&payment.user_id, key)
                    .await?
                    .map(Some)
                    .ok_or(AppError::Conflict(msg)),
                None => Err(AppError::Conflict(msg)),
            },
            Err(e) => Err(e),
        }
    }

    /// Moves the payment on from `from`. If a webhook got there first the
    /// stored payment is returned as is.
    async fn advance(
        &self,
        id: Uuid,
        from: PaymentStatus,
        update: &PaymentUpdate,
        now: DateTime<Utc>,
    ) -> Result<Payment, AppError> {
        match self.store.transition_payment(id, from, update, now).await? {
            Some(payment) => Ok(payment),
            None => self.get_payment(id).await,
        }
    }

    async fn fail(&self, payment: &Payment, from: PaymentStatus, err: AppError, now: DateTime<Utc>) -> AppError {
        warn!("Payments: {} failed: {}", payment.id, err);
        let update = PaymentUpdate::failed(err.to_string());
        if let Err(e) = self.store.transition_payment(payment.id, from, &update, now).await {
            warn!("Payments: could not record failure of {}: {}", payment.id, e);
        }
        err
    }
}

fn normalize_currency(method: PaymentMethod, currency: Option<&str>) -> Result<String, AppError> {
    let currency = currency
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty());
    match (method, currency) {
        (PaymentMethod::Hbar, None) => Ok("HBAR".into()),
        (PaymentMethod::Hbar, Some(c)) if c == "HBAR" => Ok(c),
        (PaymentMethod::Hbar, Some(c)) => Err(AppError::BadRequest(format!(
            "HBAR payments are denominated in HBAR, not {}",
            c
        ))),
        (_, None) => Ok("USD".into()),
        (_, Some(c)) if c.len() == 3 && c.chars().all(|ch| ch.is_ascii_alphabetic()) => Ok(c),
        (_, Some(c)) => Err(AppError::BadRequest(format!("invalid currency code {}", c))),
    }
}
