//! # Stripe Configuration
//!
//! Configuration management for Stripe integration.
//! All secrets are loaded from environment variables.

use pay_core::{PaymentError, PaymentResult};
use std::env;
use std::str::FromStr;

/// Which Stripe API produces the checkout artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripeFlow {
    /// Hosted Checkout Session, buyer is redirected
    CheckoutSession,
    /// PaymentIntent, frontend confirms with the client secret
    PaymentIntent,
}

impl FromStr for StripeFlow {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "checkout" | "checkout_session" => Ok(StripeFlow::CheckoutSession),
            "payment_intent" | "intent" => Ok(StripeFlow::PaymentIntent),
            other => Err(PaymentError::Configuration(format!(
                "STRIPE_FLOW must be checkout or payment_intent, got {:?}",
                other
            ))),
        }
    }
}

/// Stripe API configuration
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Secret API key (sk_test_... or sk_live_...)
    pub secret_key: String,

    /// Publishable key (pk_test_... or pk_live_...)
    pub publishable_key: String,

    /// Webhook signing secret (whsec_...)
    pub webhook_secret: String,

    /// API base URL (for testing/mocking)
    pub api_base_url: String,

    /// API version
    pub api_version: String,

    /// Where Checkout sends the buyer after paying
    pub success_url: String,

    /// Where Checkout sends the buyer after backing out
    pub cancel_url: String,

    pub flow: StripeFlow,

    /// Accepted clock skew on webhook timestamps, seconds
    pub webhook_tolerance_secs: i64,
}

const DEFAULT_RETURN_URL: &str = "http://localhost:3000/orders";

impl StripeConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `Ok(None)` when `STRIPE_SECRET_KEY` is unset so the caller can
    /// fall back to the mock gateway. Once the secret key is present the
    /// other two keys are required.
    ///
    /// Env vars:
    /// - `STRIPE_SECRET_KEY`
    /// - `STRIPE_PUBLISHABLE_KEY`
    /// - `STRIPE_WEBHOOK_SECRET`
    /// - `STRIPE_SUCCESS_URL`, `STRIPE_CANCEL_URL` (optional)
    /// - `STRIPE_FLOW` = `checkout` | `payment_intent` (optional)
    pub fn from_env() -> PaymentResult<Option<Self>> {
        let secret_key = match env::var("STRIPE_SECRET_KEY") {
            Ok(v) if !v.trim().is_empty() => v,
            _ => return Ok(None),
        };

        let publishable_key = env::var("STRIPE_PUBLISHABLE_KEY").map_err(|_| {
            PaymentError::Configuration("STRIPE_PUBLISHABLE_KEY not set".to_string())
        })?;

        let webhook_secret = env::var("STRIPE_WEBHOOK_SECRET").map_err(|_| {
            PaymentError::Configuration("STRIPE_WEBHOOK_SECRET not set".to_string())
        })?;

        let mut config = Self::new(secret_key, publishable_key, webhook_secret);
        config.validate()?;

        if let Ok(url) = env::var("STRIPE_SUCCESS_URL") {
            config.success_url = url;
        }
        if let Ok(url) = env::var("STRIPE_CANCEL_URL") {
            config.cancel_url = url;
        }
        if let Ok(flow) = env::var("STRIPE_FLOW") {
            config.flow = flow.parse()?;
        }

        Ok(Some(config))
    }

    /// Create config with explicit values (for testing)
    pub fn new(
        secret_key: impl Into<String>,
        publishable_key: impl Into<String>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            secret_key: secret_key.into(),
            publishable_key: publishable_key.into(),
            webhook_secret: webhook_secret.into(),
            api_base_url: "https://api.stripe.com".to_string(),
            api_version: "2024-12-18.acacia".to_string(),
            success_url: DEFAULT_RETURN_URL.to_string(),
            cancel_url: DEFAULT_RETURN_URL.to_string(),
            flow: StripeFlow::CheckoutSession,
            webhook_tolerance_secs: 300,
        }
    }

    /// Validate key formats
    pub fn validate(&self) -> PaymentResult<()> {
        if !self.secret_key.starts_with("sk_test_") && !self.secret_key.starts_with("sk_live_") {
            return Err(PaymentError::Configuration(
                "STRIPE_SECRET_KEY must start with sk_test_ or sk_live_".to_string(),
            ));
        }

        if !self.publishable_key.starts_with("pk_test_")
            && !self.publishable_key.starts_with("pk_live_")
        {
            return Err(PaymentError::Configuration(
                "STRIPE_PUBLISHABLE_KEY must start with pk_test_ or pk_live_".to_string(),
            ));
        }

        if !self.webhook_secret.starts_with("whsec_") {
            return Err(PaymentError::Configuration(
                "STRIPE_WEBHOOK_SECRET must start with whsec_".to_string(),
            ));
        }

        Ok(())
    }

    /// Check if using test keys
    pub fn is_test_mode(&self) -> bool {
        self.secret_key.starts_with("sk_test_")
    }

    /// Get authorization header value
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.secret_key)
    }

    /// Builder: set custom API base URL (for testing)
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Builder: select the checkout flow
    pub fn with_flow(mut self, flow: StripeFlow) -> Self {
        self.flow = flow;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let config = StripeConfig::new("sk_test_abc123", "pk_test_xyz789", "whsec_secret");
        assert!(config.validate().is_ok());
        assert!(config.is_test_mode());

        let config = StripeConfig::new("sk_live_abc123", "pk_live_xyz789", "whsec_secret");
        assert!(config.validate().is_ok());
        assert!(!config.is_test_mode());

        let bad = StripeConfig::new("rk_abc", "pk_test_xyz789", "whsec_secret");
        assert!(matches!(bad.validate(), Err(PaymentError::Configuration(_))));

        let bad = StripeConfig::new("sk_test_abc", "pk_test_xyz789", "secret");
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_auth_header() {
        let config = StripeConfig::new("sk_test_abc123", "pk_test_xyz789", "whsec_secret");
        assert_eq!(config.auth_header(), "Bearer sk_test_abc123");
    }

    #[test]
    fn test_flow_parse() {
        assert_eq!(
            "payment_intent".parse::<StripeFlow>().unwrap(),
            StripeFlow::PaymentIntent
        );
        assert_eq!(
            "Checkout".parse::<StripeFlow>().unwrap(),
            StripeFlow::CheckoutSession
        );
        assert!("elements".parse::<StripeFlow>().is_err());
    }
}
