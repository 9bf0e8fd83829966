// Off-chain payment rails: Stripe, PayPal and a mobile money aggregator

use super::fees::to_minor_units;
use crate::config::{MobileMoneyConfig, PaypalConfig, StripeConfig};
use crate::error::AppError;
use crate::models::{Payment, PaymentMethod, PaymentStatus};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

/// Extra details some rails need to start a collection.
#[derive(Debug, Clone, Default)]
pub struct PaymentContext {
    pub phone_number: Option<String>,
    pub return_url: Option<String>,
}

/// What the provider said when the payment was started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RailOutcome {
    pub status: PaymentStatus,
    pub provider_reference: String,
    pub checkout_url: Option<String>,
}

#[async_trait::async_trait]
pub trait PaymentRail: Send + Sync {
    fn method(&self) -> PaymentMethod;

    async fn initiate(&self, payment: &Payment, ctx: &PaymentContext) -> Result<RailOutcome, AppError>;
}

async fn provider_error(provider: &str, response: Response) -> AppError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    error!("{}: request failed with {}: {}", provider, status, body);
    AppError::Provider(format!("{} returned {}", provider, status))
}

// ============================================================================
// Stripe
// ============================================================================

pub struct StripeRail {
    http: Client,
    api_base: String,
    secret_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
}

impl StripeRail {
    pub fn new(http: Client, config: &StripeConfig) -> Self {
        Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        }
    }
}

/// PaymentIntent status to payment status
pub fn stripe_status(intent_status: &str) -> PaymentStatus {
    match intent_status {
        "succeeded" => PaymentStatus::Completed,
        "canceled" => PaymentStatus::Cancelled,
        "requires_payment_method" | "requires_confirmation" | "requires_action" | "processing"
        | "requires_capture" => PaymentStatus::Processing,
        _ => PaymentStatus::Pending,
    }
}

#[async_trait::async_trait]
impl PaymentRail for StripeRail {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Stripe
    }

    async fn initiate(&self, payment: &Payment, _ctx: &PaymentContext) -> Result<RailOutcome, AppError> {
        let secret = self
            .secret_key
            .as_deref()
            .ok_or_else(|| AppError::Provider("stripe is not configured".into()))?;

        let amount = to_minor_units(payment.amount)?.to_string();
        let currency = payment.currency.to_lowercase();
        let payment_id = payment.id.to_string();
        let description = payment.description.clone().unwrap_or_default();
        let form = [
            ("amount", amount.as_str()),
            ("currency", currency.as_str()),
            ("description", description.as_str()),
            ("metadata[payment_id]", payment_id.as_str()),
            ("metadata[payment_type]", payment.payment_type.as_str()),
            ("automatic_payment_methods[enabled]", "true"),
        ];

        let response = self
            .http
            .post(format!("{}/v1/payment_intents", self.api_base))
            .bearer_auth(secret)
            .header("Idempotency-Key", payment_id.as_str())
            .form(&form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(provider_error("stripe", response).await);
        }

        let intent: PaymentIntent = response.json().await?;
        info!("Stripe: payment intent {} is {}", intent.id, intent.status);
        Ok(RailOutcome {
            status: stripe_status(&intent.status),
            provider_reference: intent.id,
            checkout_url: None,
        })
    }
}

// ============================================================================
// PayPal
// ============================================================================

pub struct PaypalRail {
    http: Client,
    api_base: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    return_url: String,
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct PaypalOrder {
    id: String,
    #[serde(default)]
    links: Vec<PaypalLink>,
}

#[derive(Debug, Deserialize)]
struct PaypalLink {
    href: String,
    rel: String,
}

impl PaypalRail {
    pub fn new(http: Client, config: &PaypalConfig) -> Self {
        Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            return_url: config.return_url.clone(),
        }
    }

    async fn access_token(&self) -> Result<String, AppError> {
        let (Some(id), Some(secret)) = (&self.client_id, &self.client_secret) else {
            return Err(AppError::Provider("paypal is not configured".into()));
        };

        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.api_base))
            .basic_auth(id, Some(secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(provider_error("paypal", response).await);
        }
        let token: AccessToken = response.json().await?;
        Ok(token.access_token)
    }
}

#[async_trait::async_trait]
impl PaymentRail for PaypalRail {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Paypal
    }

    async fn initiate(&self, payment: &Payment, ctx: &PaymentContext) -> Result<RailOutcome, AppError> {
        let token = self.access_token().await?;
        let return_url = ctx.return_url.as_deref().unwrap_or(&self.return_url);

        let response = self
            .http
            .post(format!("{}/v2/checkout/orders", self.api_base))
            .bearer_auth(token)
            .header("PayPal-Request-Id", payment.id.to_string())
            .json(&json!({
                "intent": "CAPTURE",
                "purchase_units": [{
                    "reference_id": payment.id.to_string(),
                    "custom_id": payment.id.to_string(),
                    "description": payment.description,
                    "amount": {
                        "currency_code": payment.currency.to_uppercase(),
                        "value": payment.amount.round_dp(2).to_string(),
                    },
                }],
                "application_context": {
                    "return_url": return_url,
                    "cancel_url": return_url,
                    "user_action": "PAY_NOW",
                },
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(provider_error("paypal", response).await);
        }

        let order: PaypalOrder = response.json().await?;
        let approve = order
            .links
            .into_iter()
            .find(|l| l.rel == "approve" || l.rel == "payer-action")
            .map(|l| l.href)
            .ok_or_else(|| AppError::Provider(format!("paypal order {} has no approval link", order.id)))?;

        info!("PayPal: order {} created for payment {}", order.id, payment.id);
        Ok(RailOutcome {
            status: PaymentStatus::Processing,
            provider_reference: order.id,
            checkout_url: Some(approve),
        })
    }
}

// ============================================================================
// Mobile money
// ============================================================================

pub struct MobileMoneyRail {
    http: Client,
    api_base: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Collection {
    transaction_id: String,
    status: String,
}

impl MobileMoneyRail {
    pub fn new(http: Client, config: &MobileMoneyConfig) -> Self {
        Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }
}

/// Aggregator collection status to payment status
pub fn mobile_money_status(status: &str) -> PaymentStatus {
    match status.to_ascii_uppercase().as_str() {
        "SUCCESSFUL" | "SUCCESS" | "COMPLETED" => PaymentStatus::Completed,
        "FAILED" | "REJECTED" | "EXPIRED" => PaymentStatus::Failed,
        "CANCELLED" => PaymentStatus::Cancelled,
        _ => PaymentStatus::Processing,
    }
}

#[async_trait::async_trait]
impl PaymentRail for MobileMoneyRail {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::MobileMoney
    }

    async fn initiate(&self, payment: &Payment, ctx: &PaymentContext) -> Result<RailOutcome, AppError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::Provider("mobile money is not configured".into()))?;
        let phone = ctx
            .phone_number
            .as_deref()
            .ok_or_else(|| AppError::BadRequest("phoneNumber is required for MOBILE_MONEY".into()))?;

        let response = self
            .http
            .post(format!("{}/collections", self.api_base))
            .bearer_auth(api_key)
            .json(&json!({
                "reference": payment.id.to_string(),
                "amount": payment.amount.to_string(),
                "currency": payment.currency,
                "phoneNumber": phone,
                "description": payment.description,
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(provider_error("mobile_money", response).await);
        }

        let collection: Collection = response.json().await?;
        info!(
            "Mobile money: collection {} is {}",
            collection.transaction_id, collection.status
        );
        Ok(RailOutcome {
            status: mobile_money_status(&collection.status),
            provider_reference: collection.transaction_id,
            checkout_url: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentType;
    use axum::{routing::post, Json, Router};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    async fn spawn_provider(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router.into_make_service()).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn payment(method: PaymentMethod) -> Payment {
        let now = Utc::now();
        Payment {
            id: Uuid::new_v4(),
            user_id: "0.0.1001".into(),
            amount: Decimal::new(4999, 2),
            currency: "USD".into(),
            method,
            payment_type: PaymentType::VerificationFee,
            status: PaymentStatus::Pending,
            fee_amount: Decimal::ZERO,
            net_amount: Decimal::new(4999, 2),
            provider_reference: None,
            checkout_url: None,
            transaction_id: None,
            seller_wallet: None,
            idempotency_key: None,
            failure_reason: None,
            description: Some("KYC verification".into()),
            created_at: now,
            updated_at: now,
            settlement_claimed_at: None,
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(stripe_status("succeeded"), PaymentStatus::Completed);
        assert_eq!(stripe_status("requires_payment_method"), PaymentStatus::Processing);
        assert_eq!(stripe_status("canceled"), PaymentStatus::Cancelled);
        assert_eq!(mobile_money_status("successful"), PaymentStatus::Completed);
        assert_eq!(mobile_money_status("PENDING"), PaymentStatus::Processing);
        assert_eq!(mobile_money_status("FAILED"), PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_stripe_creates_intent() {
        let router = Router::new().route(
            "/v1/payment_intents",
            post(|body: String| async move {
                assert!(body.contains("amount=4999"));
                assert!(body.contains("currency=usd"));
                Json(json!({ "id": "pi_123", "status": "requires_payment_method" }))
            }),
        );
        let rail = StripeRail::new(
            Client::new(),
            &StripeConfig {
                api_base: spawn_provider(router).await,
                secret_key: Some("sk_test".into()),
            },
        );

        let outcome = rail
            .initiate(&payment(PaymentMethod::Stripe), &PaymentContext::default())
            .await
            .unwrap();
        assert_eq!(outcome.provider_reference, "pi_123");
        assert_eq!(outcome.status, PaymentStatus::Processing);
    }

    #[tokio::test]
    async fn test_stripe_without_key_fails() {
        let rail = StripeRail::new(
            Client::new(),
            &StripeConfig {
                api_base: "http://127.0.0.1:9".into(),
                secret_key: None,
            },
        );
        let err = rail
            .initiate(&payment(PaymentMethod::Stripe), &PaymentContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Provider(_)));
    }

    #[tokio::test]
    async fn test_paypal_returns_approval_link() {
        let router = Router::new()
            .route(
                "/v1/oauth2/token",
                post(|| async { Json(json!({ "access_token": "A21", "token_type": "Bearer" })) }),
            )
            .route(
                "/v2/checkout/orders",
                post(|Json(body): Json<serde_json::Value>| async move {
                    assert_eq!(body["purchase_units"][0]["amount"]["value"], "49.99");
                    Json(json!({
                        "id": "5O190127TN364715T",
                        "status": "CREATED",
                        "links": [
                            { "href": "https://api.paypal.com/v2/checkout/orders/5O1", "rel": "self" },
                            { "href": "https://www.paypal.com/checkoutnow?token=5O1", "rel": "approve" }
                        ]
                    }))
                }),
            );
        let rail = PaypalRail::new(
            Client::new(),
            &PaypalConfig {
                api_base: spawn_provider(router).await,
                client_id: Some("id".into()),
                client_secret: Some("secret".into()),
                return_url: "http://localhost/return".into(),
            },
        );

        let outcome = rail
            .initiate(&payment(PaymentMethod::Paypal), &PaymentContext::default())
            .await
            .unwrap();
        assert_eq!(outcome.status, PaymentStatus::Processing);
        assert_eq!(
            outcome.checkout_url.as_deref(),
            Some("https://www.paypal.com/checkoutnow?token=5O1")
        );
    }

    #[tokio::test]
    async fn test_mobile_money_requires_phone() {
        let rail = MobileMoneyRail::new(
            Client::new(),
            &MobileMoneyConfig {
                api_base: "http://127.0.0.1:9".into(),
                api_key: Some("key".into()),
            },
        );
        let err = rail
            .initiate(&payment(PaymentMethod::MobileMoney), &PaymentContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_provider_error_status() {
        let router = Router::new().route(
            "/collections",
            post(|| async { (axum::http::StatusCode::UNPROCESSABLE_ENTITY, "bad msisdn") }),
        );
        let rail = MobileMoneyRail::new(
            Client::new(),
            &MobileMoneyConfig {
                api_base: spawn_provider(router).await,
                api_key: Some("key".into()),
            },
        );
        let ctx = PaymentContext {
            phone_number: Some("+256700000000".into()),
            return_url: None,
        };
        let err = rail
            .initiate(&payment(PaymentMethod::MobileMoney), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Provider(ref m) if m.contains("422")));
    }
}
