//! # Callback Types
//!
//! Provider-neutral representation of an asynchronous payment notification:
//! the raw inbound request, and the normalized result every gateway adapter
//! reduces it to.

use crate::error::{PaymentError, PaymentResult};
use crate::money::Price;
use crate::order::OrderNo;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Payment channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    Alipay,
    Stripe,
    Wechat,
    Paypal,
    Mock,
}

impl PaymentType {
    pub const ALL: [PaymentType; 5] = [
        PaymentType::Alipay,
        PaymentType::Stripe,
        PaymentType::Wechat,
        PaymentType::Paypal,
        PaymentType::Mock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Alipay => "alipay",
            PaymentType::Stripe => "stripe",
            PaymentType::Wechat => "wechat",
            PaymentType::Paypal => "paypal",
            PaymentType::Mock => "mock",
        }
    }
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentType {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "alipay" => Ok(PaymentType::Alipay),
            "stripe" => Ok(PaymentType::Stripe),
            "wechat" | "wechatpay" | "wechat_pay" => Ok(PaymentType::Wechat),
            "paypal" => Ok(PaymentType::Paypal),
            "mock" => Ok(PaymentType::Mock),
            other => Err(PaymentError::InvalidRequest(format!(
                "Unknown payment provider: {}",
                other
            ))),
        }
    }
}

/// Normalized trade status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "raw", rename_all = "snake_case")]
pub enum TradeStatus {
    /// Money captured
    Success,
    /// Trade closed or cancelled without payment
    Closed,
    /// Still waiting on the buyer
    Pending,
    /// Anything else, kept verbatim for the logs
    Unrecognized(String),
}

impl TradeStatus {
    /// Map a provider status string onto the normalized set.
    pub fn normalize(raw: &str) -> Self {
        match raw {
            "TRADE_SUCCESS" | "TRADE_FINISHED" | "succeeded" | "COMPLETED" | "SUCCESS" => {
                TradeStatus::Success
            }
            "TRADE_CLOSED" | "CANCELLED" | "CLOSED" | "REVOKED" | "PAYERROR" | "expired"
            | "canceled" | "DENIED" | "VOIDED" => TradeStatus::Closed,
            "WAIT_BUYER_PAY" | "NOTPAY" | "USERPAYING" | "PENDING" | "APPROVED" | "unpaid" => {
                TradeStatus::Pending
            }
            other => TradeStatus::Unrecognized(other.to_string()),
        }
    }

    pub fn as_label(&self) -> &str {
        match self {
            TradeStatus::Success => "success",
            TradeStatus::Closed => "closed",
            TradeStatus::Pending => "pending",
            TradeStatus::Unrecognized(raw) => raw,
        }
    }
}

/// Normalized outcome of a verified provider callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackResult {
    /// Provider-side trade / capture id
    pub external_trade_id: String,
    pub order_no: OrderNo,
    pub trade_status: TradeStatus,
    /// Reported amount; `None` when the provider omitted it
    pub amount: Option<Price>,
    pub raw_payload: serde_json::Value,
    pub payment_type: PaymentType,
}

/// Raw inbound callback: exact body bytes plus lower-cased headers.
#[derive(Debug, Clone, Default)]
pub struct CallbackRequest {
    pub body: Vec<u8>,
    headers: HashMap<String, String>,
}

impl CallbackRequest {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            headers: HashMap::new(),
        }
    }

    /// Builder: add a header (name is case-insensitive)
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// Required header, or a verification failure naming it
    pub fn require_header(&self, name: &str) -> PaymentResult<&str> {
        self.header(name).filter(|v| !v.is_empty()).ok_or_else(|| {
            PaymentError::WebhookVerificationFailed(format!("Missing {} header", name))
        })
    }

    pub fn body_str(&self) -> PaymentResult<&str> {
        std::str::from_utf8(&self.body)
            .map_err(|e| PaymentError::WebhookParseError(format!("body is not UTF-8: {}", e)))
    }

    /// Decode an `application/x-www-form-urlencoded` body.
    pub fn form_params(&self) -> PaymentResult<BTreeMap<String, String>> {
        serde_urlencoded::from_bytes(&self.body)
            .map_err(|e| PaymentError::WebhookParseError(format!("invalid form body: {}", e)))
    }

    pub fn json(&self) -> PaymentResult<serde_json::Value> {
        serde_json::from_slice(&self.body)
            .map_err(|e| PaymentError::WebhookParseError(format!("invalid JSON body: {}", e)))
    }
}
