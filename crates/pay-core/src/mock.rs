//! # Mock Gateway
//!
//! Stand-in provider for development and tests. Checkout points at the
//! frontend's `mock-pay` page; callbacks are trusted as-is and echo the
//! supplied fields back as a [`CallbackResult`]. Every result is labelled
//! [`PaymentType::Mock`]; a `payment_type` in the body is only kept in the
//! raw payload.

use crate::callback::{CallbackRequest, CallbackResult, PaymentType, TradeStatus};
use crate::error::{PaymentError, PaymentResult};
use crate::gateway::{CallbackAck, CheckoutArtifact, PaymentGateway};
use crate::money::{Currency, Price};
use crate::order::{Order, OrderNo};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

/// Body accepted by the mock callback endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct MockCallbackPayload {
    #[serde(alias = "out_trade_no")]
    pub order_no: String,
    pub trade_status: String,
    #[serde(default)]
    pub payment_type: Option<String>,
    #[serde(default)]
    pub trade_no: Option<String>,
    #[serde(default)]
    pub total_amount: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MockGateway {
    frontend_url: String,
    currency: Currency,
}

impl MockGateway {
    pub fn new(frontend_url: impl Into<String>, currency: Currency) -> Self {
        Self {
            frontend_url: frontend_url.into().trim_end_matches('/').to_string(),
            currency,
        }
    }

    fn parse_payload(request: &CallbackRequest) -> PaymentResult<MockCallbackPayload> {
        let looks_like_json = request
            .body
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .map(|b| *b == b'{')
            .unwrap_or(false);

        if looks_like_json {
            serde_json::from_slice(&request.body).map_err(|e| {
                PaymentError::WebhookParseError(format!("invalid mock callback: {}", e))
            })
        } else {
            serde_urlencoded::from_bytes(&request.body).map_err(|e| {
                PaymentError::WebhookParseError(format!("invalid mock callback: {}", e))
            })
        }
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new("http://localhost:3000", Currency::CNY)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    #[instrument(skip(self, order, _subject), fields(order_no = %order.order_no))]
    async fn create_payment(
        &self,
        order: &Order,
        _subject: &str,
    ) -> PaymentResult<CheckoutArtifact> {
        let url = format!(
            "{}/mock-pay?id={}&order_no={}&amount={}&provider=mock",
            self.frontend_url,
            order.id,
            order.order_no,
            order.total_amount.to_decimal_string()
        );
        debug!("Created mock payment url");
        Ok(CheckoutArtifact::RedirectUrl { url })
    }

    async fn verify_callback(&self, _request: &CallbackRequest) -> PaymentResult<()> {
        Ok(())
    }

    async fn process_callback(&self, request: &CallbackRequest) -> PaymentResult<CallbackResult> {
        let payload = Self::parse_payload(request)?;

        if payload.order_no.trim().is_empty() {
            return Err(PaymentError::WebhookParseError("order_no is required".to_string()));
        }
        if payload.trade_status.trim().is_empty() {
            return Err(PaymentError::WebhookParseError(
                "trade_status is required".to_string(),
            ));
        }

        let currency = match payload.currency.as_deref() {
            Some(c) if !c.is_empty() => c.parse()?,
            _ => self.currency,
        };

        let amount = match payload.total_amount.as_deref() {
            Some(a) if !a.is_empty() => {
                let price = Price::parse_decimal(a, currency)
                    .map_err(|e| PaymentError::WebhookParseError(e.to_string()))?;
                if price.amount < 0 {
                    return Err(PaymentError::WebhookParseError(format!(
                        "total_amount must not be negative: {}",
                        a
                    )));
                }
                Some(price)
            }
            _ => None,
        };

        let external_trade_id = match payload.trade_no.as_deref() {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => format!("MOCK-{}", payload.order_no),
        };

        let raw_payload = serde_json::json!({
            "order_no": payload.order_no,
            "trade_status": payload.trade_status,
            "payment_type": payload.payment_type,
            "trade_no": payload.trade_no,
            "total_amount": payload.total_amount,
        });

        Ok(CallbackResult {
            external_trade_id,
            order_no: OrderNo::from(payload.order_no.as_str()),
            trade_status: TradeStatus::normalize(&payload.trade_status),
            amount,
            raw_payload,
            payment_type: PaymentType::Mock,
        })
    }

    fn acknowledgment(&self) -> CallbackAck {
        CallbackAck::plain("success")
    }

    fn payment_type(&self) -> PaymentType {
        PaymentType::Mock
    }
}
