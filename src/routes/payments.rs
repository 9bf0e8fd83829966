// Payment, escrow and provider webhook routes

use super::{check_webhook_secret, header, AdminGuard, WalletAuth};
use crate::error::AppError;
use crate::models::{Payment, PaymentType};
use crate::payments::{CreateEscrowRequest, CreatePaymentRequest, FeeQuote, WebhookReceipt};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

const IDEMPOTENCY_HEADER: &str = "idempotency-key";

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/payments", post(create_payment))
        .route("/api/payments/:id", get(get_payment))
        .route("/api/payments/:id/cancel", post(cancel_payment))
        .route("/api/users/:wallet/payments", get(list_user_payments))
        .route("/api/fees/quote", get(quote_fee))
        .route("/api/escrow", post(create_escrow))
        .route("/api/escrow/:id/release", post(release_escrow))
        .route("/api/escrow/:id/refund", post(refund_escrow))
        .route("/payments/webhook/:provider", post(payment_webhook))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeeQuoteQuery {
    payment_type: PaymentType,
    amount: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelPaymentRequest {
    wallet_address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseEscrowRequest {
    buyer: String,
}

async fn create_payment(
    auth: WalletAuth,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<Json<Payment>, AppError> {
    auth.require(&req.user_id)?;
    let key = header(&headers, IDEMPOTENCY_HEADER);
    Ok(Json(state.payments.create_payment(req, key, Utc::now()).await?))
}

async fn get_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    Ok(Json(state.payments.get_payment(id).await?))
}

async fn cancel_payment(
    auth: WalletAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CancelPaymentRequest>,
) -> Result<Json<Payment>, AppError> {
    auth.require(&req.wallet_address)?;
    let payment = state
        .payments
        .cancel_payment(id, &req.wallet_address, Utc::now())
        .await?;
    Ok(Json(payment))
}

async fn list_user_payments(
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<String>,
) -> Result<Json<Vec<Payment>>, AppError> {
    Ok(Json(state.payments.list_user_payments(&wallet).await?))
}

async fn quote_fee(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FeeQuoteQuery>,
) -> Result<Json<FeeQuote>, AppError> {
    Ok(Json(state.payments.quote_fee(query.payment_type, query.amount)?))
}

async fn create_escrow(
    auth: WalletAuth,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateEscrowRequest>,
) -> Result<(StatusCode, Json<Payment>), AppError> {
    auth.require(&req.buyer)?;
    let key = header(&headers, IDEMPOTENCY_HEADER);
    let payment = state.payments.create_escrow(req, key, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

async fn release_escrow(
    auth: WalletAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReleaseEscrowRequest>,
) -> Result<Json<Payment>, AppError> {
    auth.require(&req.buyer)?;
    Ok(Json(state.payments.release_escrow(id, &req.buyer, Utc::now()).await?))
}

async fn refund_escrow(
    _admin: AdminGuard,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    Ok(Json(state.payments.refund_escrow(id, Utc::now()).await?))
}

async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<Json<WebhookReceipt>, AppError> {
    check_webhook_secret(&state, &headers, &provider)?;
    Ok(Json(state.payments.handle_webhook(&provider, &payload, Utc::now()).await?))
}

#[cfg(test)]
mod tests {
    use super::super::tests::{admin_req, auth_req, get_req, json_req, send};
    use crate::testing::{seed_user, TestApp};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use chrono::Utc;
    use rust_decimal::Decimal;
    use serde_json::{json, Value};

    const BUYER: &str = "0.0.6001";
    const SELLER: &str = "0.0.6002";

    fn with_headers(uri: &str, body: Value, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn webhook(provider: &str, event: Value) -> Request<Body> {
        with_headers(
            &format!("/payments/webhook/{}", provider),
            event,
            &[("x-webhook-secret", TestApp::WEBHOOK_SECRET)],
        )
    }

    fn decimal(value: &Value) -> Decimal {
        value.as_str().unwrap().parse().unwrap()
    }

    fn payment_body(method: &str) -> Value {
        json!({
            "userId": BUYER,
            "amount": "1000",
            "method": method,
            "paymentType": "TOKENIZATION_FEE",
        })
    }

    #[tokio::test]
    async fn test_fee_quote() {
        let app = TestApp::new();
        let (status, body) = send(&app, get_req("/api/fees/quote?paymentType=TOKENIZATION_FEE&amount=1000")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(decimal(&body["feeAmount"]), Decimal::from(20));
        assert_eq!(decimal(&body["netAmount"]), Decimal::from(980));

        let (status, _) = send(&app, get_req("/api/fees/quote?paymentType=TOKENIZATION_FEE&amount=-5")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_hbar_payment_with_idempotency_key() {
        let app = TestApp::new();
        let token = app.login(BUYER).await;
        let bearer = format!("Bearer {}", token);
        let req = || {
            with_headers(
                "/api/payments",
                payment_body("HBAR"),
                &[("idempotency-key", "order-17"), ("authorization", bearer.as_str())],
            )
        };

        let (status, first) = send(&app, req()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["status"], "COMPLETED");
        assert_eq!(decimal(&first["feeAmount"]), Decimal::from(20));

        let (_, second) = send(&app, req()).await;
        assert_eq!(first["id"], second["id"]);
        assert_eq!(app.ledger.calls().len(), 1);

        let (_, list) = send(&app, get_req(&format!("/api/users/{}/payments", BUYER))).await;
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (status, fetched) = send(&app, get_req(&format!("/api/payments/{}", first["id"].as_str().unwrap()))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["transactionId"], first["transactionId"]);
    }

    #[tokio::test]
    async fn test_payment_requires_payer_session() {
        let app = TestApp::new();
        let (status, _) = send(&app, json_req("POST", "/api/payments", payment_body("HBAR"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let seller = app.login(SELLER).await;
        let (status, _) = send(&app, auth_req("POST", "/api/payments", &seller, payment_body("HBAR"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(app.ledger.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ledger_failure_marks_payment_failed() {
        let app = TestApp::new();
        let token = app.login(BUYER).await;
        app.ledger.set_failing(true);
        let (status, body) = send(&app, auth_req("POST", "/api/payments", &token, payment_body("HBAR"))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().starts_with("ledger call failed"));

        let (_, list) = send(&app, get_req(&format!("/api/users/{}/payments", BUYER))).await;
        assert_eq!(list[0]["status"], "FAILED");
    }

    #[tokio::test]
    async fn test_fraction_of_a_cent_is_rejected() {
        let app = TestApp::new();
        let token = app.login(BUYER).await;
        let mut body = payment_body("STRIPE");
        body["amount"] = json!("10.005");
        let (status, _) = send(&app, auth_req("POST", "/api/payments", &token, body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stripe_webhook_requires_secret() {
        let app = TestApp::new();
        let token = app.login(BUYER).await;
        let (_, payment) = send(&app, auth_req("POST", "/api/payments", &token, payment_body("STRIPE"))).await;
        assert_eq!(payment["status"], "PROCESSING");
        let id = payment["id"].as_str().unwrap().to_string();

        let event = json!({
            "type": "payment_intent.succeeded",
            "data": { "object": { "id": payment["providerReference"], "metadata": { "payment_id": id } } }
        });

        let (status, _) = send(&app, json_req("POST", "/payments/webhook/stripe", event.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, receipt) = send(&app, webhook("stripe", event)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(receipt["handled"], true);

        let (_, fetched) = send(&app, get_req(&format!("/api/payments/{}", id))).await;
        assert_eq!(fetched["status"], "COMPLETED");

        let (status, receipt) = send(&app, webhook("venmo", json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(receipt["handled"], false);
    }

    #[tokio::test]
    async fn test_webhook_cannot_move_escrow() {
        let app = TestApp::new();
        seed_user(app.store.as_ref(), BUYER, 0, Utc::now()).await;
        let token = app.login(BUYER).await;
        let escrow = json!({ "buyer": BUYER, "seller": SELLER, "amount": "100" });
        let (_, held) = send(&app, auth_req("POST", "/api/escrow", &token, escrow)).await;
        let id = held["id"].as_str().unwrap().to_string();

        let (status, receipt) = send(&app, webhook("mobile_money", json!({ "reference": id, "status": "FAILED" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(receipt["handled"], false);

        let (_, fetched) = send(&app, get_req(&format!("/api/payments/{}", id))).await;
        assert_eq!(fetched["status"], "PROCESSING");

        let (status, refunded) = send(&app, admin_req("POST", &format!("/api/escrow/{}/refund", id), json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(refunded["status"], "REFUNDED");
    }

    #[tokio::test]
    async fn test_cancel_payment() {
        let app = TestApp::new();
        let buyer = app.login(BUYER).await;
        let seller = app.login(SELLER).await;
        let (_, payment) = send(&app, auth_req("POST", "/api/payments", &buyer, payment_body("BANK_TRANSFER"))).await;
        assert_eq!(payment["status"], "PROCESSING");
        let uri = format!("/api/payments/{}/cancel", payment["id"].as_str().unwrap());

        let (status, _) = send(&app, json_req("POST", &uri, json!({ "walletAddress": BUYER }))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, auth_req("POST", &uri, &seller, json!({ "walletAddress": SELLER }))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(&app, auth_req("POST", &uri, &buyer, json!({ "walletAddress": BUYER }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "CANCELLED");

        let (status, _) = send(&app, auth_req("POST", &uri, &buyer, json!({ "walletAddress": BUYER }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_escrow_release_and_refund() {
        let app = TestApp::new();
        seed_user(app.store.as_ref(), BUYER, 0, Utc::now()).await;
        let buyer = app.login(BUYER).await;
        let seller = app.login(SELLER).await;
        let escrow = json!({ "buyer": BUYER, "seller": SELLER, "amount": "100" });

        let (status, _) = send(&app, json_req("POST", "/api/escrow", escrow.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, held) = send(&app, auth_req("POST", "/api/escrow", &buyer, escrow.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(held["status"], "PROCESSING");
        let release_uri = format!("/api/escrow/{}/release", held["id"].as_str().unwrap());

        // The buyer id is public, so naming it in the body is not enough
        let (status, _) = send(&app, auth_req("POST", &release_uri, &seller, json!({ "buyer": BUYER }))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, auth_req("POST", &release_uri, &seller, json!({ "buyer": SELLER }))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, released) = send(&app, auth_req("POST", &release_uri, &buyer, json!({ "buyer": BUYER }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(released["status"], "COMPLETED");

        let (_, held) = send(&app, auth_req("POST", "/api/escrow", &buyer, escrow)).await;
        let refund_uri = format!("/api/escrow/{}/refund", held["id"].as_str().unwrap());
        let (status, _) = send(&app, json_req("POST", &refund_uri, json!({}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, refunded) = send(&app, admin_req("POST", &refund_uri, json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(refunded["status"], "REFUNDED");
    }
}
