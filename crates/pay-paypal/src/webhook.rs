//! # PayPal Webhook Events
//!
//! Classifies a delivered event into either a settled result or an approved
//! order that still needs a server-side capture.

use pay_core::{
    CallbackResult, Currency, OrderNo, PaymentError, PaymentResult, PaymentType, Price,
    TradeStatus,
};
use serde::Deserialize;

/// Events the webhook must be subscribed to
pub const REQUIRED_WEBHOOK_EVENTS: &[&str] = &[
    "CHECKOUT.ORDER.APPROVED",
    "CHECKOUT.ORDER.VOIDED",
    "PAYMENT.CAPTURE.COMPLETED",
    "PAYMENT.CAPTURE.PENDING",
    "PAYMENT.CAPTURE.DENIED",
];

#[derive(Debug, Deserialize)]
pub(crate) struct WebhookEvent {
    pub event_type: String,
    #[serde(default)]
    pub resource: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Money {
    pub currency_code: String,
    pub value: String,
}

impl Money {
    pub fn to_price(&self) -> PaymentResult<Price> {
        let currency: Currency = self
            .currency_code
            .parse()
            .map_err(|e: PaymentError| PaymentError::WebhookParseError(e.to_string()))?;
        Price::parse_decimal(&self.value, currency)
            .map_err(|e| PaymentError::WebhookParseError(e.to_string()))
    }
}

/// `resource` of a `PAYMENT.CAPTURE.*` event, also one capture inside an order
#[derive(Debug, Deserialize)]
pub(crate) struct Capture {
    pub id: String,
    #[serde(default)]
    pub status: String,
    pub amount: Option<Money>,
    pub custom_id: Option<String>,
    pub invoice_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PurchaseUnit {
    pub reference_id: Option<String>,
    pub custom_id: Option<String>,
    pub amount: Option<Money>,
    #[serde(default)]
    pub payments: Option<Payments>,
}

impl PurchaseUnit {
    pub fn order_no(&self) -> Option<&str> {
        self.custom_id
            .as_deref()
            .or(self.reference_id.as_deref())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Payments {
    #[serde(default)]
    pub captures: Vec<Capture>,
}

/// `resource` of a `CHECKOUT.ORDER.*` event, also the capture response
#[derive(Debug, Deserialize)]
pub(crate) struct PaypalOrder {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub purchase_units: Vec<PurchaseUnit>,
}

/// What a verified event asks the gateway to do
#[derive(Debug)]
pub enum EventAction {
    /// Outcome known from the event itself
    Settle(CallbackResult),
    /// Buyer approved; capture before reporting a result
    Capture {
        paypal_order_id: String,
        order_no: OrderNo,
        amount: Option<Price>,
        raw_payload: serde_json::Value,
    },
}

fn parse_resource<T: for<'de> Deserialize<'de>>(resource: serde_json::Value) -> PaymentResult<T> {
    serde_json::from_value(resource)
        .map_err(|e| PaymentError::WebhookParseError(format!("resource: {}", e)))
}

fn missing(field: &str) -> PaymentError {
    PaymentError::WebhookParseError(format!("{} missing", field))
}

/// Classify a webhook delivery.
///
/// Unconsumed event types come back as [`PaymentError::UnsupportedEvent`].
pub fn classify_event(payload: &[u8]) -> PaymentResult<EventAction> {
    let raw_payload: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| PaymentError::WebhookParseError(format!("invalid JSON body: {}", e)))?;
    let event: WebhookEvent = serde_json::from_value(raw_payload.clone())
        .map_err(|e| PaymentError::WebhookParseError(format!("event: {}", e)))?;

    let capture_status = match event.event_type.as_str() {
        "PAYMENT.CAPTURE.COMPLETED" => Some(TradeStatus::Success),
        "PAYMENT.CAPTURE.PENDING" => Some(TradeStatus::Pending),
        "PAYMENT.CAPTURE.DENIED" => Some(TradeStatus::Closed),
        _ => None,
    };

    if let Some(trade_status) = capture_status {
        let capture: Capture = parse_resource(event.resource)?;
        let order_no = capture
            .custom_id
            .as_deref()
            .or(capture.invoice_id.as_deref())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| missing("resource.custom_id"))?;
        let amount = capture.amount.as_ref().map(Money::to_price).transpose()?;

        return Ok(EventAction::Settle(CallbackResult {
            external_trade_id: capture.id,
            order_no: OrderNo::from(order_no),
            trade_status,
            amount,
            raw_payload,
            payment_type: PaymentType::Paypal,
        }));
    }

    match event.event_type.as_str() {
        "CHECKOUT.ORDER.APPROVED" | "CHECKOUT.ORDER.VOIDED" => {
            let order: PaypalOrder = parse_resource(event.resource)?;
            let unit = order
                .purchase_units
                .first()
                .ok_or_else(|| missing("resource.purchase_units"))?;
            let order_no = OrderNo::from(unit.order_no().ok_or_else(|| missing("custom_id"))?);
            let amount = unit.amount.as_ref().map(Money::to_price).transpose()?;

            if event.event_type == "CHECKOUT.ORDER.VOIDED" {
                return Ok(EventAction::Settle(CallbackResult {
                    external_trade_id: order.id,
                    order_no,
                    trade_status: TradeStatus::Closed,
                    amount,
                    raw_payload,
                    payment_type: PaymentType::Paypal,
                }));
            }

            Ok(EventAction::Capture {
                paypal_order_id: order.id,
                order_no,
                amount,
                raw_payload,
            })
        }
        _ => Err(PaymentError::UnsupportedEvent {
            provider: "paypal".to_string(),
            event_type: event.event_type,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture_event(event_type: &str) -> Vec<u8> {
        serde_json::json!({
            "id": "WH-58D329510W468432D-8HN650336L201105X",
            "event_type": event_type,
            "resource": {
                "id": "42311647XV020574X",
                "status": "COMPLETED",
                "amount": {"currency_code": "USD", "value": "99.00"},
                "custom_id": "abc123",
            }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_capture_completed_settles() {
        match classify_event(&capture_event("PAYMENT.CAPTURE.COMPLETED")).unwrap() {
            EventAction::Settle(result) => {
                assert_eq!(result.order_no.as_str(), "abc123");
                assert_eq!(result.external_trade_id, "42311647XV020574X");
                assert_eq!(result.trade_status, TradeStatus::Success);
                assert_eq!(result.amount, Some(Price::from_minor(9900, Currency::USD)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_capture_denied_closes() {
        match classify_event(&capture_event("PAYMENT.CAPTURE.DENIED")).unwrap() {
            EventAction::Settle(result) => assert_eq!(result.trade_status, TradeStatus::Closed),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_order_approved_requests_capture() {
        let payload = serde_json::json!({
            "event_type": "CHECKOUT.ORDER.APPROVED",
            "resource": {
                "id": "5O190127TN364715T",
                "status": "APPROVED",
                "purchase_units": [{
                    "reference_id": "abc123",
                    "custom_id": "abc123",
                    "amount": {"currency_code": "USD", "value": "99.00"}
                }]
            }
        });

        match classify_event(payload.to_string().as_bytes()).unwrap() {
            EventAction::Capture {
                paypal_order_id,
                order_no,
                ..
            } => {
                assert_eq!(paypal_order_id, "5O190127TN364715T");
                assert_eq!(order_no.as_str(), "abc123");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unconsumed_event_is_unsupported() {
        let err = classify_event(&capture_event("PAYMENT.CAPTURE.REFUNDED")).unwrap_err();
        assert!(matches!(err, PaymentError::UnsupportedEvent { .. }));
        assert_eq!(err.status_code(), 200);
    }

    #[test]
    fn test_missing_order_reference() {
        let payload = serde_json::json!({
            "event_type": "PAYMENT.CAPTURE.COMPLETED",
            "resource": {"id": "42311647XV020574X", "status": "COMPLETED"}
        });
        assert!(matches!(
            classify_event(payload.to_string().as_bytes()),
            Err(PaymentError::WebhookParseError(_))
        ));
    }
}
