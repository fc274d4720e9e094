//! # Payment Gateway Trait
//!
//! Capability contract every payment provider adapter implements.
//! Implementations: Alipay, Stripe, WeChat Pay, PayPal, Mock.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  PaymentGateway (trait)                     │
//! │  ├── create_payment()     order → checkout artifact         │
//! │  ├── verify_callback()    raw request → authentic?          │
//! │  ├── process_callback()   raw request → CallbackResult      │
//! │  ├── acknowledgment()     body the provider expects back    │
//! │  └── payment_type()                                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Adapters never touch order state; the ledger owns every transition.

use crate::callback::{CallbackRequest, CallbackResult, PaymentType};
use crate::error::PaymentResult;
use crate::order::Order;
use async_trait::async_trait;
use serde::Serialize;

/// What the buyer needs to complete payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckoutArtifact {
    /// Hosted page to redirect to
    RedirectUrl { url: String },
    /// Client-side confirmation (Stripe PaymentIntent)
    ClientSecret {
        client_secret: String,
        publishable_key: String,
    },
    /// URL to render as a QR code (WeChat NATIVE)
    QrCode { code_url: String },
}

/// HTTP body a provider expects in reply to a callback it delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackAck {
    pub content_type: &'static str,
    pub body: String,
}

impl CallbackAck {
    pub fn plain(body: impl Into<String>) -> Self {
        Self {
            content_type: "text/plain; charset=utf-8",
            body: body.into(),
        }
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self {
            content_type: "application/json",
            body: value.to_string(),
        }
    }

    pub fn xml(body: impl Into<String>) -> Self {
        Self {
            content_type: "application/xml",
            body: body.into(),
        }
    }
}

/// Core trait for payment provider implementations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Produce the checkout artifact for a pending order.
    ///
    /// # Arguments
    /// * `order` - The order being paid; its `order_no` is the correlation key
    /// * `subject` - Human-readable purchase description
    async fn create_payment(&self, order: &Order, subject: &str)
        -> PaymentResult<CheckoutArtifact>;

    /// Check the authenticity of an inbound callback.
    ///
    /// Returns `WebhookVerificationFailed` for missing/invalid signatures.
    async fn verify_callback(&self, request: &CallbackRequest) -> PaymentResult<()>;

    /// Parse a verified callback into the normalized result.
    async fn process_callback(&self, request: &CallbackRequest) -> PaymentResult<CallbackResult>;

    /// Response body that stops the provider from redelivering.
    fn acknowledgment(&self) -> CallbackAck {
        CallbackAck::json(serde_json::json!({ "status": "success" }))
    }

    fn payment_type(&self) -> PaymentType;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_serialization() {
        let artifact = CheckoutArtifact::QrCode {
            code_url: "weixin://wxpay/bizpayurl?pr=abc".to_string(),
        };
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["kind"], "qr_code");
        assert_eq!(json["code_url"], "weixin://wxpay/bizpayurl?pr=abc");
    }

    #[test]
    fn test_ack_content_types() {
        assert_eq!(CallbackAck::plain("success").content_type, "text/plain; charset=utf-8");
        assert_eq!(
            CallbackAck::json(serde_json::json!({"status": "success"})).body,
            r#"{"status":"success"}"#
        );
    }
}
