//! # Stripe Gateway
//!
//! Checkout via the Checkout Sessions API (hosted page) or the
//! PaymentIntents API (client secret), selected by [`StripeFlow`].

use crate::config::{StripeConfig, StripeFlow};
use crate::webhook;
use async_trait::async_trait;
use chrono::Utc;
use pay_core::{
    CallbackRequest, CallbackResult, CheckoutArtifact, Order, PaymentError, PaymentGateway,
    PaymentResult, PaymentType,
};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error, info, instrument};

/// Stripe gateway adapter
pub struct StripeGateway {
    config: StripeConfig,
    client: Client,
}

impl StripeGateway {
    /// Create a new Stripe gateway
    pub fn new(config: StripeConfig) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| PaymentError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    fn checkout_session_params(&self, order: &Order, subject: &str) -> Vec<(String, String)> {
        let order_no = order.order_no.to_string();
        vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), self.config.success_url.clone()),
            ("cancel_url".to_string(), self.config.cancel_url.clone()),
            ("client_reference_id".to_string(), order_no.clone()),
            (
                "line_items[0][price_data][currency]".to_string(),
                order.total_amount.currency.as_str().to_string(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                order.total_amount.amount.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                subject.to_string(),
            ),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("metadata[order_no]".to_string(), order_no.clone()),
            (
                "payment_intent_data[metadata][order_no]".to_string(),
                order_no,
            ),
        ]
    }

    fn payment_intent_params(&self, order: &Order, subject: &str) -> Vec<(String, String)> {
        vec![
            ("amount".to_string(), order.total_amount.amount.to_string()),
            (
                "currency".to_string(),
                order.total_amount.currency.as_str().to_string(),
            ),
            ("description".to_string(), subject.to_string()),
            ("metadata[order_no]".to_string(), order.order_no.to_string()),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ]
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        idempotency_key: &str,
        form_params: &[(String, String)],
    ) -> PaymentResult<T> {
        let url = format!("{}{}", self.config.api_base_url, path);

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.config.auth_header())
            .header("Stripe-Version", &self.config.api_version)
            .header("Idempotency-Key", idempotency_key)
            .form(form_params)
            .send()
            .await
            .map_err(|e| PaymentError::NetworkError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            error!("Stripe API error: status={}, body={}", status, body);

            if let Ok(error_response) = serde_json::from_str::<StripeErrorResponse>(&body) {
                return Err(PaymentError::ProviderError {
                    provider: "stripe".to_string(),
                    message: error_response.error.message,
                });
            }

            return Err(PaymentError::ProviderError {
                provider: "stripe".to_string(),
                message: format!("HTTP {}: {}", status, body),
            });
        }

        serde_json::from_str(&body).map_err(|e| PaymentError::ProviderError {
            provider: "stripe".to_string(),
            message: format!("unreadable response: {}", e),
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, order, subject), fields(order_no = %order.order_no))]
    async fn create_payment(
        &self,
        order: &Order,
        subject: &str,
    ) -> PaymentResult<CheckoutArtifact> {
        let idempotency_key = order.order_no.to_string();

        match self.config.flow {
            StripeFlow::CheckoutSession => {
                let params = self.checkout_session_params(order, subject);
                debug!("Creating Stripe checkout session: total={}", order.total_amount.display());

                let session: StripeCheckoutSessionResponse = self
                    .post_form("/v1/checkout/sessions", &idempotency_key, &params)
                    .await?;

                info!("Created Stripe checkout session: id={}", session.id);
                Ok(CheckoutArtifact::RedirectUrl { url: session.url })
            }
            StripeFlow::PaymentIntent => {
                let params = self.payment_intent_params(order, subject);

                let intent: StripePaymentIntentResponse = self
                    .post_form("/v1/payment_intents", &idempotency_key, &params)
                    .await?;

                info!("Created Stripe payment intent: id={}", intent.id);
                Ok(CheckoutArtifact::ClientSecret {
                    client_secret: intent.client_secret,
                    publishable_key: self.config.publishable_key.clone(),
                })
            }
        }
    }

    #[instrument(skip(self, request))]
    async fn verify_callback(&self, request: &CallbackRequest) -> PaymentResult<()> {
        let header = request.require_header("stripe-signature")?;
        webhook::verify_signature(
            &self.config.webhook_secret,
            &request.body,
            header,
            Utc::now().timestamp(),
            self.config.webhook_tolerance_secs,
        )
    }

    async fn process_callback(&self, request: &CallbackRequest) -> PaymentResult<CallbackResult> {
        webhook::parse_event(&request.body)
    }

    fn payment_type(&self) -> PaymentType {
        PaymentType::Stripe
    }
}

// =============================================================================
// Stripe API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct StripeCheckoutSessionResponse {
    id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntentResponse {
    id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorResponse {
    error: StripeError,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pay_core::{Currency, NewOrderLine, Price};
    use uuid::Uuid;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn order() -> Order {
        Order::create(
            Uuid::new_v4(),
            &[NewOrderLine {
                skill_id: Uuid::new_v4(),
                price: Price::from_minor(9900, Currency::USD),
                quantity: 1,
            }],
        )
        .unwrap()
    }

    fn gateway(server: &MockServer, flow: StripeFlow) -> StripeGateway {
        let config = StripeConfig::new("sk_test_abc", "pk_test_abc", "whsec_test")
            .with_api_base_url(server.uri())
            .with_flow(flow);
        StripeGateway::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_checkout_session_created_with_order_metadata() {
        let server = MockServer::start().await;
        let order = order();

        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(header("Idempotency-Key", order.order_no.as_str()))
            .and(body_string_contains(format!(
                "metadata%5Border_no%5D={}",
                order.order_no
            )))
            .and(body_string_contains("unit_amount%5D=9900"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "cs_test_1",
                "url": "https://checkout.stripe.com/c/pay/cs_test_1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let artifact = gateway(&server, StripeFlow::CheckoutSession)
            .create_payment(&order, "Rust Agent")
            .await
            .unwrap();

        assert_eq!(
            artifact,
            CheckoutArtifact::RedirectUrl {
                url: "https://checkout.stripe.com/c/pay/cs_test_1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_payment_intent_returns_client_secret() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "pi_1",
                "client_secret": "pi_1_secret_abc"
            })))
            .mount(&server)
            .await;

        let artifact = gateway(&server, StripeFlow::PaymentIntent)
            .create_payment(&order(), "Rust Agent")
            .await
            .unwrap();

        assert_eq!(
            artifact,
            CheckoutArtifact::ClientSecret {
                client_secret: "pi_1_secret_abc".to_string(),
                publishable_key: "pk_test_abc".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_provider_error_is_gateway_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .respond_with(ResponseTemplate::new(402).set_body_json(serde_json::json!({
                "error": { "message": "Your card was declined." }
            })))
            .mount(&server)
            .await;

        let err = gateway(&server, StripeFlow::CheckoutSession)
            .create_payment(&order(), "Rust Agent")
            .await
            .unwrap_err();

        assert!(err.is_gateway_error());
        assert!(err.to_string().contains("declined"));
    }

    #[tokio::test]
    async fn test_verify_callback_requires_signature_header() {
        let server = MockServer::start().await;
        let gw = gateway(&server, StripeFlow::CheckoutSession);

        let req = CallbackRequest::new(b"{}".to_vec());
        assert!(matches!(
            gw.verify_callback(&req).await,
            Err(PaymentError::WebhookVerificationFailed(_))
        ));

        let now = Utc::now().timestamp();
        let sig = webhook::sign_payload("whsec_test", now, b"{}");
        let req = CallbackRequest::new(b"{}".to_vec())
            .with_header("Stripe-Signature", format!("t={},v1={}", now, sig));
        assert!(gw.verify_callback(&req).await.is_ok());
    }
}
