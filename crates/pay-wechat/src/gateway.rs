//! # WeChat Pay Gateway
//!
//! v2 API. Checkout calls `pay/unifiedorder` with `trade_type=NATIVE` and
//! hands the returned `code_url` to the frontend as a QR code. Both the
//! request and every response or notification carry an uppercase hex
//! HMAC-SHA256 `sign` keyed by the merchant API key.

use crate::config::WechatConfig;
use crate::xml::{parse_xml, to_xml};
use async_trait::async_trait;
use pay_core::signer::{canonicalize_excluding, constant_time_eq, hmac_sha256_hex};
use pay_core::{
    CallbackAck, CallbackRequest, CallbackResult, CheckoutArtifact, Currency, Order, OrderNo,
    PaymentError, PaymentGateway, PaymentResult, PaymentType, Price, TradeStatus,
};
use reqwest::Client;
use std::collections::BTreeMap;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const SIGN_TYPE: &str = "HMAC-SHA256";
const ACK_XML: &str =
    "<xml><return_code>SUCCESS</return_code><return_msg>OK</return_msg></xml>";

/// Subjects longer than this are cut; WeChat rejects `body` over 128 bytes
const MAX_BODY_BYTES: usize = 128;

pub struct WechatGateway {
    config: WechatConfig,
    client: Client,
}

/// Sign a parameter map the v2 way: canonical form (without `sign`), then
/// `&key=<api_key>`, HMAC-SHA256, uppercase hex.
pub fn sign_params(params: &BTreeMap<String, String>, api_key: &str) -> String {
    let mut message = canonicalize_excluding(params, &["sign"]);
    message.push_str("&key=");
    message.push_str(api_key);
    hmac_sha256_hex(api_key.as_bytes(), message.as_bytes()).to_uppercase()
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

impl WechatGateway {
    pub fn new(config: WechatConfig) -> PaymentResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| PaymentError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn verify_sign(&self, fields: &BTreeMap<String, String>) -> PaymentResult<()> {
        let sign = fields
            .get("sign")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PaymentError::WebhookVerificationFailed("sign missing".to_string()))?;

        if let Some(sign_type) = fields.get("sign_type") {
            if sign_type != SIGN_TYPE {
                return Err(PaymentError::WebhookVerificationFailed(format!(
                    "unsupported sign_type {}",
                    sign_type
                )));
            }
        }

        let expected = sign_params(fields, &self.config.api_key);
        if constant_time_eq(&expected, &sign.to_uppercase()) {
            Ok(())
        } else {
            Err(PaymentError::WebhookVerificationFailed(
                "HMAC-SHA256 signature mismatch".to_string(),
            ))
        }
    }

    fn unified_order_params(&self, order: &Order, subject: &str) -> PaymentResult<BTreeMap<String, String>> {
        if order.total_amount.currency != Currency::CNY {
            return Err(PaymentError::UnsupportedCurrency {
                currency: order.total_amount.currency.to_string(),
            });
        }

        let mut params = BTreeMap::new();
        params.insert("appid".to_string(), self.config.app_id.clone());
        params.insert("mch_id".to_string(), self.config.mch_id.clone());
        params.insert("nonce_str".to_string(), Uuid::new_v4().simple().to_string());
        params.insert("sign_type".to_string(), SIGN_TYPE.to_string());
        params.insert("body".to_string(), truncate_utf8(subject, MAX_BODY_BYTES).to_string());
        params.insert("out_trade_no".to_string(), order.order_no.to_string());
        // CNY minor units are fen
        params.insert("total_fee".to_string(), order.total_amount.amount.to_string());
        params.insert("spbill_create_ip".to_string(), self.config.spbill_create_ip.clone());
        params.insert("notify_url".to_string(), self.config.notify_url.clone());
        params.insert("trade_type".to_string(), "NATIVE".to_string());
        params.insert("product_id".to_string(), order.id.simple().to_string());

        let sign = sign_params(&params, &self.config.api_key);
        params.insert("sign".to_string(), sign);
        Ok(params)
    }

    fn provider_error(message: impl Into<String>) -> PaymentError {
        PaymentError::ProviderError {
            provider: "wechat".to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl PaymentGateway for WechatGateway {
    #[instrument(skip(self, order, subject), fields(order_no = %order.order_no))]
    async fn create_payment(
        &self,
        order: &Order,
        subject: &str,
    ) -> PaymentResult<CheckoutArtifact> {
        let params = self.unified_order_params(order, subject)?;
        let url = format!("{}/pay/unifiedorder", self.config.api_base_url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .body(to_xml(&params)?)
            .send()
            .await
            .map_err(|e| PaymentError::NetworkError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            error!("WeChat Pay API error: status={}, body={}", status, body);
            return Err(Self::provider_error(format!("HTTP {}", status)));
        }

        let fields = parse_xml(&body).map_err(|e| Self::provider_error(e.to_string()))?;

        if fields.get("return_code").map(|s| s.as_str()) != Some("SUCCESS") {
            let msg = fields.get("return_msg").cloned().unwrap_or_default();
            error!("WeChat Pay unifiedorder rejected: {}", msg);
            return Err(Self::provider_error(msg));
        }

        self.verify_sign(&fields)
            .map_err(|_| Self::provider_error("response signature mismatch"))?;

        if fields.get("result_code").map(|s| s.as_str()) != Some("SUCCESS") {
            let code = fields.get("err_code").cloned().unwrap_or_default();
            let des = fields.get("err_code_des").cloned().unwrap_or_default();
            error!("WeChat Pay unifiedorder failed: {} {}", code, des);
            return Err(Self::provider_error(format!("{}: {}", code, des)));
        }

        let code_url = fields
            .get("code_url")
            .filter(|s| !s.is_empty())
            .cloned()
            .ok_or_else(|| Self::provider_error("code_url missing"))?;

        info!("Created WeChat NATIVE order: prepay_id={:?}", fields.get("prepay_id"));
        Ok(CheckoutArtifact::QrCode { code_url })
    }

    #[instrument(skip(self, request))]
    async fn verify_callback(&self, request: &CallbackRequest) -> PaymentResult<()> {
        let fields = parse_xml(request.body_str()?)
            .map_err(|e| PaymentError::WebhookVerificationFailed(e.to_string()))?;

        if fields.get("return_code").map(|s| s.as_str()) != Some("SUCCESS") {
            return Err(PaymentError::WebhookVerificationFailed(format!(
                "return_code {:?}",
                fields.get("return_code")
            )));
        }

        if fields.get("mch_id") != Some(&self.config.mch_id) {
            warn!("WeChat notification for a different mch_id");
            return Err(PaymentError::WebhookVerificationFailed(
                "mch_id mismatch".to_string(),
            ));
        }

        self.verify_sign(&fields)
    }

    async fn process_callback(&self, request: &CallbackRequest) -> PaymentResult<CallbackResult> {
        let fields = parse_xml(request.body_str()?)?;

        let get = |key: &str| {
            fields
                .get(key)
                .filter(|s| !s.is_empty())
                .map(|s| s.as_str())
        };
        let require = |key: &str| {
            get(key).ok_or_else(|| PaymentError::WebhookParseError(format!("{} missing", key)))
        };

        let order_no = OrderNo::from(require("out_trade_no")?);
        let external_trade_id = require("transaction_id")?.to_string();

        // Query-style payloads carry trade_state; pay notifications only result_code
        let raw_status = get("trade_state").or_else(|| get("result_code")).ok_or_else(|| {
            PaymentError::WebhookParseError("trade_state/result_code missing".to_string())
        })?;

        let amount = match get("total_fee") {
            Some(fen) => {
                let amount: i64 = fen.parse().map_err(|_| {
                    PaymentError::WebhookParseError(format!("total_fee {:?} is not an integer", fen))
                })?;
                Some(Price::from_minor(amount, Currency::CNY))
            }
            None => None,
        };

        let raw_payload = serde_json::to_value(&fields)
            .map_err(|e| PaymentError::Serialization(e.to_string()))?;

        Ok(CallbackResult {
            external_trade_id,
            order_no,
            trade_status: TradeStatus::normalize(raw_status),
            amount,
            raw_payload,
            payment_type: PaymentType::Wechat,
        })
    }

    fn acknowledgment(&self) -> CallbackAck {
        CallbackAck::xml(ACK_XML)
    }

    fn payment_type(&self) -> PaymentType {
        PaymentType::Wechat
    }
}
