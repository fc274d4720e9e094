//! # WeChat Pay Configuration

use pay_core::{PaymentError, PaymentResult};
use std::env;

pub const DEFAULT_API_BASE_URL: &str = "https://api.mch.weixin.qq.com";

/// Merchant API keys for the v2 API are exactly 32 characters
const API_KEY_LEN: usize = 32;

/// WeChat Pay merchant configuration
#[derive(Debug, Clone)]
pub struct WechatConfig {
    /// Merchant id
    pub mch_id: String,

    /// Official account / app id bound to the merchant
    pub app_id: String,

    /// v2 API key, also the HMAC key
    pub api_key: String,

    pub notify_url: String,

    /// Reported as `spbill_create_ip` on NATIVE orders
    pub spbill_create_ip: String,

    /// API base URL (for testing/mocking)
    pub api_base_url: String,
}

impl WechatConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `Ok(None)` when `WECHAT_PAY_MCH_ID` is unset.
    ///
    /// Env vars:
    /// - `WECHAT_PAY_MCH_ID`
    /// - `WECHAT_PAY_APP_ID`
    /// - `WECHAT_PAY_API_KEY`
    /// - `WECHAT_PAY_NOTIFY_URL`
    /// - `WECHAT_PAY_SPBILL_IP` (optional)
    /// - `WECHAT_PAY_API_BASE_URL` (optional)
    pub fn from_env() -> PaymentResult<Option<Self>> {
        let mch_id = match env::var("WECHAT_PAY_MCH_ID") {
            Ok(v) if !v.trim().is_empty() => v,
            _ => return Ok(None),
        };

        let required = |name: &str| {
            env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| PaymentError::Configuration(format!("{} not set", name)))
        };

        let mut config = Self::new(
            mch_id,
            required("WECHAT_PAY_APP_ID")?,
            required("WECHAT_PAY_API_KEY")?,
        );
        config.notify_url = required("WECHAT_PAY_NOTIFY_URL")?;
        config.validate()?;

        if let Ok(ip) = env::var("WECHAT_PAY_SPBILL_IP") {
            config.spbill_create_ip = ip;
        }
        if let Ok(url) = env::var("WECHAT_PAY_API_BASE_URL") {
            config.api_base_url = url;
        }

        Ok(Some(config))
    }

    /// Create config with explicit values (for testing)
    pub fn new(
        mch_id: impl Into<String>,
        app_id: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            mch_id: mch_id.into(),
            app_id: app_id.into(),
            api_key: api_key.into(),
            notify_url: "http://localhost:8080/api/v1/payment/callback/wechat".to_string(),
            spbill_create_ip: "127.0.0.1".to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }

    pub fn validate(&self) -> PaymentResult<()> {
        if self.api_key.len() != API_KEY_LEN {
            return Err(PaymentError::Configuration(format!(
                "WECHAT_PAY_API_KEY must be {} characters",
                API_KEY_LEN
            )));
        }
        Ok(())
    }

    /// Builder: point at a different API host
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }
}
