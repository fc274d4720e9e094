//! # PayPal Configuration

use pay_core::{PaymentError, PaymentResult};
use std::env;
use std::str::FromStr;

pub const SANDBOX_API_BASE_URL: &str = "https://api-m.sandbox.paypal.com";
pub const LIVE_API_BASE_URL: &str = "https://api-m.paypal.com";

/// PayPal environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaypalMode {
    Sandbox,
    Live,
}

impl PaypalMode {
    pub fn api_base_url(&self) -> &'static str {
        match self {
            PaypalMode::Sandbox => SANDBOX_API_BASE_URL,
            PaypalMode::Live => LIVE_API_BASE_URL,
        }
    }
}

impl FromStr for PaypalMode {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(PaypalMode::Sandbox),
            "live" => Ok(PaypalMode::Live),
            other => Err(PaymentError::Configuration(format!(
                "PAYPAL_MODE must be sandbox or live, got {:?}",
                other
            ))),
        }
    }
}

/// PayPal REST configuration
#[derive(Debug, Clone)]
pub struct PaypalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub mode: PaypalMode,

    /// Id of the webhook registered in the developer dashboard; required to
    /// verify deliveries
    pub webhook_id: String,

    pub return_url: String,
    pub cancel_url: String,
    pub brand_name: String,

    /// API base URL (for testing/mocking)
    pub api_base_url: String,
}

impl PaypalConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `Ok(None)` when `PAYPAL_CLIENT_ID` is unset.
    ///
    /// Env vars:
    /// - `PAYPAL_CLIENT_ID`, `PAYPAL_CLIENT_SECRET`
    /// - `PAYPAL_WEBHOOK_ID`
    /// - `PAYPAL_MODE` = `sandbox` (default) | `live`
    /// - `PAYPAL_RETURN_URL`, `PAYPAL_CANCEL_URL` (optional)
    /// - `PAYPAL_API_BASE_URL` (optional)
    pub fn from_env() -> PaymentResult<Option<Self>> {
        let client_id = match env::var("PAYPAL_CLIENT_ID") {
            Ok(v) if !v.trim().is_empty() => v,
            _ => return Ok(None),
        };

        let client_secret = env::var("PAYPAL_CLIENT_SECRET")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| PaymentError::Configuration("PAYPAL_CLIENT_SECRET not set".to_string()))?;

        let webhook_id = env::var("PAYPAL_WEBHOOK_ID")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| PaymentError::Configuration("PAYPAL_WEBHOOK_ID not set".to_string()))?;

        let mode = match env::var("PAYPAL_MODE") {
            Ok(v) if !v.is_empty() => v.parse()?,
            _ => PaypalMode::Sandbox,
        };

        let mut config = Self::new(client_id, client_secret, webhook_id).with_mode(mode);

        if let Ok(url) = env::var("PAYPAL_RETURN_URL") {
            config.return_url = url;
        }
        if let Ok(url) = env::var("PAYPAL_CANCEL_URL") {
            config.cancel_url = url;
        }
        if let Ok(url) = env::var("PAYPAL_API_BASE_URL") {
            config.api_base_url = url;
        }

        Ok(Some(config))
    }

    /// Create sandbox config with explicit values (for testing)
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        webhook_id: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            mode: PaypalMode::Sandbox,
            webhook_id: webhook_id.into(),
            return_url: "http://localhost:3000/orders/success".to_string(),
            cancel_url: "http://localhost:3000/orders/cancel".to_string(),
            brand_name: "SkillHub".to_string(),
            api_base_url: SANDBOX_API_BASE_URL.to_string(),
        }
    }

    /// Builder: switch environment (also resets the base URL)
    pub fn with_mode(mut self, mode: PaypalMode) -> Self {
        self.mode = mode;
        self.api_base_url = mode.api_base_url().to_string();
        self
    }

    /// Builder: point at a different API host
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }
}
