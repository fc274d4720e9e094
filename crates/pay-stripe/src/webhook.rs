//! # Stripe Webhook Handling
//!
//! `Stripe-Signature` verification and reduction of the consumed event types
//! to a [`CallbackResult`].
//!
//! | Event | Status |
//! |-------|--------|
//! | `checkout.session.completed` | paid → success, unpaid → pending |
//! | `checkout.session.async_payment_succeeded` | success |
//! | `checkout.session.async_payment_failed` | closed |
//! | `checkout.session.expired` | closed |
//! | `payment_intent.succeeded` | success |
//! | `payment_intent.canceled` | closed |
//!
//! The external id is the PaymentIntent id, so a session completion and the
//! matching `payment_intent.succeeded` settle the order exactly once.

use pay_core::signer::{constant_time_eq, hmac_sha256_hex};
use pay_core::{
    CallbackResult, Currency, OrderNo, PaymentError, PaymentResult, PaymentType, Price,
    TradeStatus,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

/// Events that should be enabled in the Stripe Dashboard
pub const REQUIRED_WEBHOOK_EVENTS: &[&str] = &[
    "checkout.session.completed",
    "checkout.session.async_payment_succeeded",
    "checkout.session.async_payment_failed",
    "checkout.session.expired",
    "payment_intent.succeeded",
    "payment_intent.canceled",
];

pub(crate) struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

pub(crate) fn parse_signature_header(header: &str) -> PaymentResult<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        PaymentError::WebhookVerificationFailed("Missing timestamp in signature".to_string())
    })?;

    if signatures.is_empty() {
        return Err(PaymentError::WebhookVerificationFailed(
            "No v1 signature found".to_string(),
        ));
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

/// Compute the `v1` signature Stripe would send for `payload` at `timestamp`
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut signed = format!("{}.", timestamp).into_bytes();
    signed.extend_from_slice(payload);
    hmac_sha256_hex(secret.as_bytes(), &signed)
}

/// Verify a `Stripe-Signature` header against the raw body.
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    now: i64,
    tolerance_secs: i64,
) -> PaymentResult<()> {
    let sig = parse_signature_header(header)?;

    if (now - sig.timestamp).abs() > tolerance_secs {
        return Err(PaymentError::WebhookVerificationFailed(
            "Timestamp outside tolerance".to_string(),
        ));
    }

    let expected = sign_payload(secret, sig.timestamp, payload);
    if sig
        .signatures
        .iter()
        .any(|candidate| constant_time_eq(candidate, &expected))
    {
        Ok(())
    } else {
        Err(PaymentError::WebhookVerificationFailed(
            "Signature mismatch".to_string(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct StripeWebhookEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: Map<String, Value>,
}

fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

fn order_no_from_metadata(obj: &Map<String, Value>) -> PaymentResult<OrderNo> {
    obj.get("metadata")
        .and_then(|m| m.get("order_no"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(OrderNo::from)
        .ok_or_else(|| PaymentError::WebhookParseError("metadata.order_no missing".to_string()))
}

fn amount_from(obj: &Map<String, Value>, amount_key: &str) -> PaymentResult<Option<Price>> {
    let Some(amount) = obj.get(amount_key).and_then(|v| v.as_i64()) else {
        return Ok(None);
    };
    let currency: Currency = str_field(obj, "currency")
        .unwrap_or("usd")
        .parse()
        .map_err(|e: PaymentError| PaymentError::WebhookParseError(e.to_string()))?;
    Ok(Some(Price::from_minor(amount, currency)))
}

/// Reduce a verified event body to a [`CallbackResult`].
pub fn parse_event(payload: &[u8]) -> PaymentResult<CallbackResult> {
    let event: StripeWebhookEvent = serde_json::from_slice(payload).map_err(|e| {
        PaymentError::WebhookParseError(format!("Failed to parse webhook: {}", e))
    })?;

    debug!("Stripe webhook: type={}, id={}", event.event_type, event.id);

    let obj = &event.data.object;
    let object_id = str_field(obj, "id")
        .ok_or_else(|| PaymentError::WebhookParseError("data.object.id missing".to_string()))?;

    let (trade_status, external_id, amount) = match event.event_type.as_str() {
        "checkout.session.completed"
        | "checkout.session.async_payment_succeeded"
        | "checkout.session.async_payment_failed"
        | "checkout.session.expired" => {
            let status = match event.event_type.as_str() {
                "checkout.session.completed" => match str_field(obj, "payment_status") {
                    Some("paid") | Some("no_payment_required") => TradeStatus::Success,
                    Some("unpaid") => TradeStatus::Pending,
                    Some(other) => TradeStatus::Unrecognized(other.to_string()),
                    None => TradeStatus::Unrecognized("missing payment_status".to_string()),
                },
                "checkout.session.async_payment_succeeded" => TradeStatus::Success,
                _ => TradeStatus::Closed,
            };
            let external_id = str_field(obj, "payment_intent").unwrap_or(object_id);
            (status, external_id, amount_from(obj, "amount_total")?)
        }
        "payment_intent.succeeded" => (
            TradeStatus::Success,
            object_id,
            amount_from(obj, "amount_received")?.or(amount_from(obj, "amount")?),
        ),
        "payment_intent.canceled" => (TradeStatus::Closed, object_id, amount_from(obj, "amount")?),
        other => {
            return Err(PaymentError::UnsupportedEvent {
                provider: "stripe".to_string(),
                event_type: other.to_string(),
            })
        }
    };

    let order_no = order_no_from_metadata(obj)?;
    let external_trade_id = external_id.to_string();

    let raw_payload = serde_json::json!({
        "event_id": event.id,
        "type": event.event_type,
        "object": obj,
    });

    Ok(CallbackResult {
        external_trade_id,
        order_no,
        trade_status,
        amount,
        raw_payload,
        payment_type: PaymentType::Stripe,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session_completed(payment_status: &str) -> Vec<u8> {
        json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "created": 1_700_000_000,
            "data": { "object": {
                "id": "cs_test_123",
                "payment_intent": "pi_test_456",
                "amount_total": 9900,
                "currency": "usd",
                "payment_status": payment_status,
                "metadata": { "order_no": "0f3c9a" }
            }}
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_parse_signature_header() {
        let parsed = parse_signature_header("t=1234567890,v1=abc123,v1=def456").unwrap();

        assert_eq!(parsed.timestamp, 1234567890);
        assert_eq!(parsed.signatures, vec!["abc123", "def456"]);
        assert!(parse_signature_header("v1=abc").is_err());
        assert!(parse_signature_header("t=1").is_err());
    }

    #[test]
    fn test_verify_signature() {
        let body = session_completed("paid");
        let now = 1_700_000_100;
        let header = format!("t={},v1={}", now, sign_payload("whsec_test", now, &body));

        assert!(verify_signature("whsec_test", &body, &header, now, 300).is_ok());
        assert!(verify_signature("whsec_other", &body, &header, now, 300).is_err());
        assert!(verify_signature("whsec_test", &body, &header, now + 301, 300).is_err());

        let mut tampered = body.clone();
        tampered[20] ^= 0x01;
        assert!(verify_signature("whsec_test", &tampered, &header, now, 300).is_err());
    }

    #[test]
    fn test_parse_checkout_completed() {
        let result = parse_event(&session_completed("paid")).unwrap();

        assert_eq!(result.order_no.as_str(), "0f3c9a");
        assert_eq!(result.external_trade_id, "pi_test_456");
        assert_eq!(result.trade_status, TradeStatus::Success);
        assert_eq!(result.amount, Some(Price::from_minor(9900, Currency::USD)));
        assert_eq!(result.payment_type, PaymentType::Stripe);
    }

    #[test]
    fn test_unpaid_session_is_pending() {
        let result = parse_event(&session_completed("unpaid")).unwrap();
        assert_eq!(result.trade_status, TradeStatus::Pending);
    }

    #[test]
    fn test_payment_intent_succeeded_shares_external_id() {
        let body = json!({
            "id": "evt_2",
            "type": "payment_intent.succeeded",
            "data": { "object": {
                "id": "pi_test_456",
                "amount": 9900,
                "amount_received": 9900,
                "currency": "usd",
                "metadata": { "order_no": "0f3c9a" }
            }}
        })
        .to_string();

        let from_intent = parse_event(body.as_bytes()).unwrap();
        let from_session = parse_event(&session_completed("paid")).unwrap();
        assert_eq!(from_intent.external_trade_id, from_session.external_trade_id);
    }

    #[test]
    fn test_expired_session_is_closed() {
        let body = json!({
            "id": "evt_3",
            "type": "checkout.session.expired",
            "data": { "object": {
                "id": "cs_test_123",
                "metadata": { "order_no": "0f3c9a" }
            }}
        })
        .to_string();

        let result = parse_event(body.as_bytes()).unwrap();
        assert_eq!(result.trade_status, TradeStatus::Closed);
        assert_eq!(result.external_trade_id, "cs_test_123");
    }

    #[test]
    fn test_unconsumed_event_is_unsupported() {
        let body = json!({
            "id": "evt_4",
            "type": "customer.created",
            "data": { "object": { "id": "cus_1" }}
        })
        .to_string();

        assert!(matches!(
            parse_event(body.as_bytes()),
            Err(PaymentError::UnsupportedEvent { .. })
        ));
    }

    #[test]
    fn test_missing_order_no_is_parse_error() {
        let body = json!({
            "id": "evt_5",
            "type": "payment_intent.succeeded",
            "data": { "object": { "id": "pi_1", "amount": 100, "currency": "usd" }}
        })
        .to_string();

        assert!(matches!(
            parse_event(body.as_bytes()),
            Err(PaymentError::WebhookParseError(_))
        ));
    }
}
