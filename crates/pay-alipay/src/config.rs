//! # Alipay Configuration
//!
//! Loaded from environment variables. Key material must come with a declared
//! format; see [`PrivateKeyFormat`] and [`PublicKeyFormat`].

use pay_core::{PaymentError, PaymentResult, PrivateKeyFormat, PublicKeyFormat};
use std::env;

pub const LIVE_GATEWAY_URL: &str = "https://openapi.alipay.com/gateway.do";
pub const SANDBOX_GATEWAY_URL: &str = "https://openapi-sandbox.dl.alipaydev.com/gateway.do";

const DEFAULT_RETURN_URL: &str = "http://localhost:3000/orders";

/// Alipay open-platform configuration
#[derive(Debug, Clone)]
pub struct AlipayConfig {
    pub app_id: String,

    /// Merchant application private key
    pub private_key: String,
    pub private_key_format: PrivateKeyFormat,

    /// Alipay platform public key
    pub alipay_public_key: String,
    pub public_key_format: PublicKeyFormat,

    /// Async notification endpoint
    pub notify_url: String,

    /// Browser return page
    pub return_url: String,

    pub gateway_url: String,
}

fn required(name: &str) -> PaymentResult<String> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| PaymentError::Configuration(format!("{} not set", name)))
}

impl AlipayConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `Ok(None)` when `ALIPAY_APP_ID` is unset.
    ///
    /// Env vars:
    /// - `ALIPAY_APP_ID`
    /// - `ALIPAY_PRIVATE_KEY`, `ALIPAY_PRIVATE_KEY_FORMAT`
    /// - `ALIPAY_PUBLIC_KEY`, `ALIPAY_PUBLIC_KEY_FORMAT`
    /// - `ALIPAY_NOTIFY_URL`
    /// - `ALIPAY_RETURN_URL` (optional)
    /// - `ALIPAY_SANDBOX` = `true` | `false` (optional)
    pub fn from_env() -> PaymentResult<Option<Self>> {
        let app_id = match env::var("ALIPAY_APP_ID") {
            Ok(v) if !v.trim().is_empty() => v,
            _ => return Ok(None),
        };

        let private_key = required("ALIPAY_PRIVATE_KEY")?;
        let private_key_format = required("ALIPAY_PRIVATE_KEY_FORMAT")?.parse()?;
        let alipay_public_key = required("ALIPAY_PUBLIC_KEY")?;
        let public_key_format = required("ALIPAY_PUBLIC_KEY_FORMAT")?.parse()?;
        let notify_url = required("ALIPAY_NOTIFY_URL")?;

        let return_url = env::var("ALIPAY_RETURN_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_RETURN_URL.to_string());

        let sandbox = env::var("ALIPAY_SANDBOX")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        Ok(Some(Self {
            app_id,
            private_key: unescape_newlines(&private_key),
            private_key_format,
            alipay_public_key: unescape_newlines(&alipay_public_key),
            public_key_format,
            notify_url,
            return_url,
            gateway_url: if sandbox {
                SANDBOX_GATEWAY_URL.to_string()
            } else {
                LIVE_GATEWAY_URL.to_string()
            },
        }))
    }

    /// Create config with explicit values (for testing)
    pub fn new(
        app_id: impl Into<String>,
        private_key: impl Into<String>,
        private_key_format: PrivateKeyFormat,
        alipay_public_key: impl Into<String>,
        public_key_format: PublicKeyFormat,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            private_key: private_key.into(),
            private_key_format,
            alipay_public_key: alipay_public_key.into(),
            public_key_format,
            notify_url: "http://localhost:8080/api/v1/payment/callback/alipay".to_string(),
            return_url: DEFAULT_RETURN_URL.to_string(),
            gateway_url: LIVE_GATEWAY_URL.to_string(),
        }
    }

    /// Builder: use the sandbox gateway
    pub fn sandbox(mut self) -> Self {
        self.gateway_url = SANDBOX_GATEWAY_URL.to_string();
        self
    }
}

// PEM blocks in .env files usually arrive with literal "\n"
fn unescape_newlines(s: &str) -> String {
    s.replace("\\n", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_builder() {
        let config = AlipayConfig::new(
            "2021000000000000",
            "k",
            PrivateKeyFormat::Pkcs8Der,
            "p",
            PublicKeyFormat::SpkiDer,
        );
        assert_eq!(config.gateway_url, LIVE_GATEWAY_URL);
        assert_eq!(config.sandbox().gateway_url, SANDBOX_GATEWAY_URL);
    }

    #[test]
    fn test_unescape_newlines() {
        assert_eq!(
            unescape_newlines("-----BEGIN\\nabc\\n-----END"),
            "-----BEGIN\nabc\n-----END"
        );
    }
}
