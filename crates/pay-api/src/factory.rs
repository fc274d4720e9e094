//! # Gateway Factory
//!
//! Maps a [`PaymentType`] onto a concrete adapter. A provider whose
//! credentials are absent is served by [`MockGateway`] when mock payments are
//! allowed, and refused with `ProviderNotConfigured` otherwise.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  GatewayRegistry                     │
//! │  ├── alipay  → Gateway::Alipay | Gateway::Mock       │
//! │  ├── stripe  → Gateway::Stripe | Gateway::Mock       │
//! │  ├── wechat  → Gateway::Wechat | Gateway::Mock       │
//! │  ├── paypal  → Gateway::Paypal | Gateway::Mock       │
//! │  ├── mock    → Gateway::Mock (when allowed)          │
//! │  └── default → first configured in priority order    │
//! └──────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use pay_alipay::{AlipayConfig, AlipayGateway};
use pay_core::{
    CallbackAck, CallbackRequest, CallbackResult, CheckoutArtifact, Currency, MockGateway, Order,
    PaymentError, PaymentGateway, PaymentResult, PaymentType,
};
use pay_paypal::{PaypalConfig, PaypalGateway};
use pay_stripe::{StripeConfig, StripeGateway};
use pay_wechat::{WechatConfig, WechatGateway};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Priority used when `PAYMENT_PROVIDER_PRIORITY` is unset
pub const DEFAULT_PROVIDER_PRIORITY: [PaymentType; 4] = [
    PaymentType::Alipay,
    PaymentType::Wechat,
    PaymentType::Stripe,
    PaymentType::Paypal,
];

/// Every adapter the engine can dispatch to
pub enum Gateway {
    Alipay(AlipayGateway),
    Stripe(StripeGateway),
    Wechat(WechatGateway),
    Paypal(PaypalGateway),
    Mock(MockGateway),
}

impl Gateway {
    fn inner(&self) -> &dyn PaymentGateway {
        match self {
            Gateway::Alipay(g) => g,
            Gateway::Stripe(g) => g,
            Gateway::Wechat(g) => g,
            Gateway::Paypal(g) => g,
            Gateway::Mock(g) => g,
        }
    }

    pub fn is_mock(&self) -> bool {
        matches!(self, Gateway::Mock(_))
    }
}

#[async_trait]
impl PaymentGateway for Gateway {
    async fn create_payment(
        &self,
        order: &Order,
        subject: &str,
    ) -> PaymentResult<CheckoutArtifact> {
        self.inner().create_payment(order, subject).await
    }

    async fn verify_callback(&self, request: &CallbackRequest) -> PaymentResult<()> {
        self.inner().verify_callback(request).await
    }

    async fn process_callback(&self, request: &CallbackRequest) -> PaymentResult<CallbackResult> {
        self.inner().process_callback(request).await
    }

    fn acknowledgment(&self) -> CallbackAck {
        self.inner().acknowledgment()
    }

    fn payment_type(&self) -> PaymentType {
        self.inner().payment_type()
    }
}

/// Provider credentials plus the rules for falling back to the mock
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub alipay: Option<AlipayConfig>,
    pub stripe: Option<StripeConfig>,
    pub wechat: Option<WechatConfig>,
    pub paypal: Option<PaypalConfig>,
    pub allow_mock: bool,
    pub priority: Vec<PaymentType>,
    /// Base of the mock-pay page
    pub frontend_url: String,
    /// Currency the mock assumes when a callback omits it
    pub currency: Currency,
}

impl GatewayConfig {
    /// No real provider configured; every slot is served by the mock.
    pub fn mock_only(frontend_url: impl Into<String>, currency: Currency) -> Self {
        Self {
            alipay: None,
            stripe: None,
            wechat: None,
            paypal: None,
            allow_mock: true,
            priority: DEFAULT_PROVIDER_PRIORITY.to_vec(),
            frontend_url: frontend_url.into(),
            currency,
        }
    }

    /// Read every provider's `*_from_env` on top of the app-level switches.
    pub fn from_env(
        allow_mock: bool,
        priority: Vec<PaymentType>,
        frontend_url: impl Into<String>,
        currency: Currency,
    ) -> PaymentResult<Self> {
        Ok(Self {
            alipay: AlipayConfig::from_env()?,
            stripe: StripeConfig::from_env()?,
            wechat: WechatConfig::from_env()?,
            paypal: PaypalConfig::from_env()?,
            allow_mock,
            priority,
            frontend_url: frontend_url.into(),
            currency,
        })
    }

    pub fn is_configured(&self, payment_type: PaymentType) -> bool {
        match payment_type {
            PaymentType::Alipay => self.alipay.is_some(),
            PaymentType::Stripe => self.stripe.is_some(),
            PaymentType::Wechat => self.wechat.is_some(),
            PaymentType::Paypal => self.paypal.is_some(),
            PaymentType::Mock => false,
        }
    }

    fn default_provider(&self) -> Option<PaymentType> {
        self.priority
            .iter()
            .copied()
            .find(|p| self.is_configured(*p))
    }

    fn mock_or_refuse(&self, requested: &str) -> PaymentResult<Gateway> {
        if self.allow_mock {
            debug!(requested, "serving provider with the mock gateway");
            Ok(Gateway::Mock(MockGateway::new(
                self.frontend_url.clone(),
                self.currency,
            )))
        } else {
            Err(PaymentError::ProviderNotConfigured {
                provider: requested.to_string(),
            })
        }
    }
}

/// Build the adapter for one provider.
///
/// Construction errors of a configured provider (bad key material, invalid
/// API key length) propagate instead of falling back.
pub fn select(payment_type: PaymentType, config: &GatewayConfig) -> PaymentResult<Gateway> {
    let real = match payment_type {
        PaymentType::Alipay => config
            .alipay
            .clone()
            .map(AlipayGateway::new)
            .transpose()?
            .map(Gateway::Alipay),
        PaymentType::Stripe => config
            .stripe
            .clone()
            .map(StripeGateway::new)
            .transpose()?
            .map(Gateway::Stripe),
        PaymentType::Wechat => config
            .wechat
            .clone()
            .map(WechatGateway::new)
            .transpose()?
            .map(Gateway::Wechat),
        PaymentType::Paypal => config
            .paypal
            .clone()
            .map(PaypalGateway::new)
            .transpose()?
            .map(Gateway::Paypal),
        PaymentType::Mock => None,
    };

    match real {
        Some(gateway) => Ok(gateway),
        None => config.mock_or_refuse(payment_type.as_str()),
    }
}

/// First configured provider in priority order, else the mock.
pub fn select_default(config: &GatewayConfig) -> PaymentResult<Gateway> {
    match config.default_provider() {
        Some(provider) => select(provider, config),
        None => config.mock_or_refuse("default"),
    }
}

/// Adapters built once at startup and shared by every request
pub struct GatewayRegistry {
    gateways: HashMap<PaymentType, Arc<Gateway>>,
    default: Option<Arc<Gateway>>,
}

impl GatewayRegistry {
    pub fn build(config: &GatewayConfig) -> PaymentResult<Self> {
        let mut gateways = HashMap::new();
        for provider in PaymentType::ALL {
            match select(provider, config) {
                Ok(gateway) => {
                    gateways.insert(provider, Arc::new(gateway));
                }
                Err(PaymentError::ProviderNotConfigured { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        let default = config
            .default_provider()
            .or(Some(PaymentType::Mock))
            .and_then(|p| gateways.get(&p).cloned());

        let registry = Self { gateways, default };
        for (slot, backing) in registry.providers() {
            info!(provider = %slot, backing = %backing, "payment gateway ready");
        }
        Ok(registry)
    }

    pub fn get(&self, payment_type: PaymentType) -> PaymentResult<Arc<Gateway>> {
        self.gateways
            .get(&payment_type)
            .cloned()
            .ok_or_else(|| PaymentError::ProviderNotConfigured {
                provider: payment_type.to_string(),
            })
    }

    pub fn default_gateway(&self) -> PaymentResult<Arc<Gateway>> {
        self.default
            .clone()
            .ok_or_else(|| PaymentError::ProviderNotConfigured {
                provider: "default".to_string(),
            })
    }

    /// `(slot, adapter serving it)` pairs, in `PaymentType::ALL` order
    pub fn providers(&self) -> Vec<(PaymentType, PaymentType)> {
        PaymentType::ALL
            .iter()
            .filter_map(|p| self.gateways.get(p).map(|g| (*p, g.payment_type())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stripe_config() -> StripeConfig {
        StripeConfig::new("sk_test_abc", "pk_test_abc", "whsec_abc")
    }

    #[test]
    fn test_unconfigured_provider_falls_back_to_mock() {
        let config = GatewayConfig::mock_only("http://localhost:3000", Currency::CNY);
        let gateway = select(PaymentType::Alipay, &config).unwrap();
        assert!(gateway.is_mock());
        assert_eq!(gateway.payment_type(), PaymentType::Mock);
    }

    #[test]
    fn test_mock_refused_when_disallowed() {
        let mut config = GatewayConfig::mock_only("http://localhost:3000", Currency::CNY);
        config.allow_mock = false;

        assert!(matches!(
            select(PaymentType::Wechat, &config),
            Err(PaymentError::ProviderNotConfigured { .. })
        ));
        assert!(matches!(
            select_default(&config),
            Err(PaymentError::ProviderNotConfigured { .. })
        ));
    }

    #[test]
    fn test_configured_provider_wins() {
        let mut config = GatewayConfig::mock_only("http://localhost:3000", Currency::USD);
        config.stripe = Some(stripe_config());

        let gateway = select(PaymentType::Stripe, &config).unwrap();
        assert_eq!(gateway.payment_type(), PaymentType::Stripe);

        // alipay and wechat come first in priority but are unconfigured
        let default = select_default(&config).unwrap();
        assert_eq!(default.payment_type(), PaymentType::Stripe);
    }

    #[test]
    fn test_invalid_configured_provider_propagates() {
        let mut config = GatewayConfig::mock_only("http://localhost:3000", Currency::CNY);
        config.wechat = Some(WechatConfig::new("1900000109", "wx8888888888888888", "short"));

        assert!(matches!(
            select(PaymentType::Wechat, &config),
            Err(PaymentError::Configuration(_))
        ));
        assert!(GatewayRegistry::build(&config).is_err());
    }

    #[test]
    fn test_registry_slots_and_default() {
        let mut config = GatewayConfig::mock_only("http://localhost:3000", Currency::USD);
        config.stripe = Some(stripe_config());

        let registry = GatewayRegistry::build(&config).unwrap();
        assert_eq!(
            registry.default_gateway().unwrap().payment_type(),
            PaymentType::Stripe
        );
        assert_eq!(
            registry.get(PaymentType::Paypal).unwrap().payment_type(),
            PaymentType::Mock
        );
        assert_eq!(registry.providers().len(), PaymentType::ALL.len());
    }

    #[test]
    fn test_registry_without_mock_has_gaps() {
        let mut config = GatewayConfig::mock_only("http://localhost:3000", Currency::USD);
        config.allow_mock = false;
        config.stripe = Some(stripe_config());

        let registry = GatewayRegistry::build(&config).unwrap();
        assert!(registry.get(PaymentType::Stripe).is_ok());
        assert!(matches!(
            registry.get(PaymentType::Mock),
            Err(PaymentError::ProviderNotConfigured { .. })
        ));
        assert_eq!(registry.providers(), vec![(PaymentType::Stripe, PaymentType::Stripe)]);
    }
}
