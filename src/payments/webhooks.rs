// Provider webhook payloads, reduced to a status change on one payment

use super::providers::mobile_money_status;
use crate::models::{PaymentMethod, PaymentStatus};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookProvider {
    Stripe,
    Paypal,
    MobileMoney,
}

impl WebhookProvider {
    pub fn from_path(provider: &str) -> Option<Self> {
        match provider {
            "stripe" => Some(Self::Stripe),
            "paypal" => Some(Self::Paypal),
            "mobile_money" | "mobile-money" => Some(Self::MobileMoney),
            _ => None,
        }
    }

    /// The only payment method this provider may report on.
    pub fn method(&self) -> PaymentMethod {
        match self {
            Self::Stripe => PaymentMethod::Stripe,
            Self::Paypal => PaymentMethod::Paypal,
            Self::MobileMoney => PaymentMethod::MobileMoney,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    /// Our payment id when the provider echoes it back
    pub payment_id: Option<Uuid>,
    pub provider_reference: Option<String>,
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
}

fn text(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn uuid_at(value: &Value, pointer: &str) -> Option<Uuid> {
    text(value, pointer).and_then(|s| Uuid::parse_str(&s).ok())
}

/// Returns `None` for events that carry no payment status change.
pub fn parse(provider: WebhookProvider, payload: &Value) -> Option<WebhookEvent> {
    match provider {
        WebhookProvider::Stripe => parse_stripe(payload),
        WebhookProvider::Paypal => parse_paypal(payload),
        WebhookProvider::MobileMoney => parse_mobile_money(payload),
    }
}

fn parse_stripe(payload: &Value) -> Option<WebhookEvent> {
    let status = match payload.get("type")?.as_str()? {
        "payment_intent.succeeded" => PaymentStatus::Completed,
        "payment_intent.processing" => PaymentStatus::Processing,
        "payment_intent.payment_failed" => PaymentStatus::Failed,
        "payment_intent.canceled" => PaymentStatus::Cancelled,
        _ => return None,
    };
    Some(WebhookEvent {
        payment_id: uuid_at(payload, "/data/object/metadata/payment_id"),
        provider_reference: text(payload, "/data/object/id"),
        status,
        failure_reason: text(payload, "/data/object/last_payment_error/message"),
    })
}

fn parse_paypal(payload: &Value) -> Option<WebhookEvent> {
    let status = match payload.get("event_type")?.as_str()? {
        "PAYMENT.CAPTURE.COMPLETED" => PaymentStatus::Completed,
        "PAYMENT.CAPTURE.DENIED" | "PAYMENT.CAPTURE.DECLINED" => PaymentStatus::Failed,
        "CHECKOUT.ORDER.VOIDED" => PaymentStatus::Cancelled,
        "PAYMENT.CAPTURE.REFUNDED" => PaymentStatus::Refunded,
        _ => return None,
    };
    // Capture events carry the order id under related_ids; order events use their own id
    let provider_reference = text(payload, "/resource/supplementary_data/related_ids/order_id")
        .or_else(|| text(payload, "/resource/id"));
    Some(WebhookEvent {
        payment_id: uuid_at(payload, "/resource/custom_id"),
        provider_reference,
        status,
        failure_reason: (status == PaymentStatus::Failed)
            .then(|| text(payload, "/resource/status_details/reason").unwrap_or_else(|| "capture denied".into())),
    })
}

fn parse_mobile_money(payload: &Value) -> Option<WebhookEvent> {
    let status = mobile_money_status(payload.get("status")?.as_str()?);
    Some(WebhookEvent {
        payment_id: uuid_at(payload, "/reference"),
        provider_reference: text(payload, "/transactionId"),
        status,
        failure_reason: text(payload, "/reason"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stripe_events() {
        let id = Uuid::new_v4();
        let event = parse(
            WebhookProvider::Stripe,
            &json!({
                "type": "payment_intent.payment_failed",
                "data": { "object": {
                    "id": "pi_9",
                    "metadata": { "payment_id": id.to_string() },
                    "last_payment_error": { "message": "card declined" }
                }}
            }),
        )
        .unwrap();
        assert_eq!(event.payment_id, Some(id));
        assert_eq!(event.status, PaymentStatus::Failed);
        assert_eq!(event.failure_reason.as_deref(), Some("card declined"));

        assert!(parse(WebhookProvider::Stripe, &json!({ "type": "charge.updated" })).is_none());
    }

    #[test]
    fn test_paypal_capture_uses_order_id() {
        let event = parse(
            WebhookProvider::Paypal,
            &json!({
                "event_type": "PAYMENT.CAPTURE.COMPLETED",
                "resource": {
                    "id": "CAPTURE-1",
                    "supplementary_data": { "related_ids": { "order_id": "ORDER-1" } }
                }
            }),
        )
        .unwrap();
        assert_eq!(event.provider_reference.as_deref(), Some("ORDER-1"));
        assert_eq!(event.payment_id, None);
        assert_eq!(event.status, PaymentStatus::Completed);
    }

    #[test]
    fn test_mobile_money_event() {
        let event = parse(
            WebhookProvider::MobileMoney,
            &json!({ "reference": "not-a-uuid", "transactionId": "MM-1", "status": "SUCCESSFUL" }),
        )
        .unwrap();
        assert_eq!(event.payment_id, None);
        assert_eq!(event.provider_reference.as_deref(), Some("MM-1"));
        assert_eq!(event.status, PaymentStatus::Completed);
        assert_eq!(WebhookProvider::from_path("venmo"), None);
    }

    #[test]
    fn test_provider_methods() {
        assert_eq!(WebhookProvider::Stripe.method(), PaymentMethod::Stripe);
        assert_eq!(
            WebhookProvider::from_path("mobile-money").map(|p| p.method()),
            Some(PaymentMethod::MobileMoney)
        );
    }
}
