//! # Alipay Gateway
//!
//! `alipay.trade.page.pay`: checkout is a signed redirect URL, no API call.
//! Notifications arrive form-encoded and are verified with the Alipay
//! platform public key over the canonical form (`sign` and `sign_type`
//! removed).

use crate::config::AlipayConfig;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use pay_core::signer::{canonicalize, canonicalize_excluding};
use pay_core::{
    CallbackAck, CallbackRequest, CallbackResult, CheckoutArtifact, Currency, Order, OrderNo,
    PaymentError, PaymentGateway, PaymentResult, PaymentType, Price, RsaSigner, RsaVerifier,
    TradeStatus,
};
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

const METHOD_PAGE_PAY: &str = "alipay.trade.page.pay";
const PRODUCT_CODE: &str = "FAST_INSTANT_TRADE_PAY";
const SIGN_TYPE: &str = "RSA2";

pub struct AlipayGateway {
    config: AlipayConfig,
    signer: RsaSigner,
    verifier: RsaVerifier,
}

impl AlipayGateway {
    /// Build the gateway, parsing both keys in their declared formats.
    pub fn new(config: AlipayConfig) -> PaymentResult<Self> {
        let signer = RsaSigner::from_key(&config.private_key, config.private_key_format)
            .map_err(|e| PaymentError::Configuration(format!("ALIPAY_PRIVATE_KEY: {}", e)))?;
        let verifier = RsaVerifier::from_key(&config.alipay_public_key, config.public_key_format)
            .map_err(|e| PaymentError::Configuration(format!("ALIPAY_PUBLIC_KEY: {}", e)))?;

        Ok(Self {
            config,
            signer,
            verifier,
        })
    }

    /// Alipay expects Beijing time
    fn timestamp() -> String {
        (Utc::now() + Duration::hours(8))
            .naive_utc()
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }

    /// Signed request parameters for a page-pay redirect
    pub fn page_pay_params(
        &self,
        order: &Order,
        subject: &str,
    ) -> PaymentResult<BTreeMap<String, String>> {
        if order.total_amount.currency != Currency::CNY {
            return Err(PaymentError::UnsupportedCurrency {
                currency: order.total_amount.currency.to_string(),
            });
        }

        let biz_content = serde_json::json!({
            "out_trade_no": order.order_no.as_str(),
            "total_amount": order.total_amount.to_decimal_string(),
            "subject": subject,
            "product_code": PRODUCT_CODE,
            "timeout_express": "30m",
        });

        let mut params = BTreeMap::new();
        params.insert("app_id".to_string(), self.config.app_id.clone());
        params.insert("method".to_string(), METHOD_PAGE_PAY.to_string());
        params.insert("charset".to_string(), "utf-8".to_string());
        params.insert("sign_type".to_string(), SIGN_TYPE.to_string());
        params.insert("timestamp".to_string(), Self::timestamp());
        params.insert("version".to_string(), "1.0".to_string());
        params.insert("notify_url".to_string(), self.config.notify_url.clone());
        params.insert("return_url".to_string(), self.config.return_url.clone());
        params.insert("biz_content".to_string(), biz_content.to_string());

        // Request signing covers sign_type; only `sign` itself is excluded
        let canonical = canonicalize_excluding(&params, &["sign"]);
        let sign = self.signer.sign(&canonical)?;
        params.insert("sign".to_string(), sign);

        Ok(params)
    }

    fn field<'a>(params: &'a BTreeMap<String, String>, key: &str) -> PaymentResult<&'a str> {
        params
            .get(key)
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PaymentError::WebhookParseError(format!("{} missing", key)))
    }
}

#[async_trait]
impl PaymentGateway for AlipayGateway {
    #[instrument(skip(self, order, subject), fields(order_no = %order.order_no))]
    async fn create_payment(
        &self,
        order: &Order,
        subject: &str,
    ) -> PaymentResult<CheckoutArtifact> {
        let params = self.page_pay_params(order, subject)?;
        let query = serde_urlencoded::to_string(&params)
            .map_err(|e| PaymentError::Internal(format!("encode alipay params: {}", e)))?;

        debug!("Built Alipay page-pay url");
        Ok(CheckoutArtifact::RedirectUrl {
            url: format!("{}?{}", self.config.gateway_url, query),
        })
    }

    #[instrument(skip(self, request))]
    async fn verify_callback(&self, request: &CallbackRequest) -> PaymentResult<()> {
        let params = request.form_params().map_err(|e| {
            PaymentError::WebhookVerificationFailed(format!("unreadable notification: {}", e))
        })?;

        let sign = params
            .get("sign")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PaymentError::WebhookVerificationFailed("sign missing".to_string()))?;

        match params.get("sign_type").map(|s| s.as_str()) {
            Some(SIGN_TYPE) => {}
            other => {
                return Err(PaymentError::WebhookVerificationFailed(format!(
                    "unsupported sign_type {:?}",
                    other
                )))
            }
        }

        if params.get("app_id").map(|s| s.as_str()) != Some(self.config.app_id.as_str()) {
            warn!("Alipay notification for a different app_id");
            return Err(PaymentError::WebhookVerificationFailed(
                "app_id mismatch".to_string(),
            ));
        }

        if self.verifier.verify(&canonicalize(&params), sign)? {
            Ok(())
        } else {
            Err(PaymentError::WebhookVerificationFailed(
                "RSA2 signature mismatch".to_string(),
            ))
        }
    }

    async fn process_callback(&self, request: &CallbackRequest) -> PaymentResult<CallbackResult> {
        let params = request.form_params()?;

        let order_no = OrderNo::from(Self::field(&params, "out_trade_no")?);
        let external_trade_id = Self::field(&params, "trade_no")?.to_string();
        let trade_status = TradeStatus::normalize(Self::field(&params, "trade_status")?);

        let amount = match params.get("total_amount").filter(|s| !s.is_empty()) {
            Some(raw) => Some(
                Price::parse_decimal(raw, Currency::CNY)
                    .map_err(|e| PaymentError::WebhookParseError(e.to_string()))?,
            ),
            None => None,
        };

        let raw_payload = serde_json::to_value(&params)
            .map_err(|e| PaymentError::Serialization(e.to_string()))?;

        Ok(CallbackResult {
            external_trade_id,
            order_no,
            trade_status,
            amount,
            raw_payload,
            payment_type: PaymentType::Alipay,
        })
    }

    fn acknowledgment(&self) -> CallbackAck {
        CallbackAck::plain("success")
    }

    fn payment_type(&self) -> PaymentType {
        PaymentType::Alipay
    }
}
