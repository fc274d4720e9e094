//! # PayPal Gateway
//!
//! Orders v2 with `intent=CAPTURE`. The buyer approves on PayPal; the
//! `CHECKOUT.ORDER.APPROVED` webhook triggers the capture server-side.

use crate::config::PaypalConfig;
use crate::webhook::{classify_event, EventAction, PaypalOrder};
use async_trait::async_trait;
use pay_core::{
    CallbackRequest, CallbackResult, CheckoutArtifact, Order, OrderNo, PaymentError,
    PaymentGateway, PaymentResult, PaymentType, Price, TradeStatus,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Tokens are refreshed this long before PayPal says they expire
const TOKEN_EARLY_EXPIRY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

pub struct PaypalGateway {
    config: PaypalConfig,
    client: Client,
    token: Mutex<Option<CachedToken>>,
}

impl PaypalGateway {
    pub fn new(config: PaypalConfig) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PaymentError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            token: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &PaypalConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
    }

    fn provider_error(message: impl Into<String>) -> PaymentError {
        PaymentError::ProviderError {
            provider: "paypal".to_string(),
            message: message.into(),
        }
    }

    /// Client-credentials access token, cached until shortly before expiry.
    ///
    /// The lock is held across the refresh so concurrent callers share one
    /// token request.
    async fn access_token(&self) -> PaymentResult<String> {
        let mut guard = self.token.lock().await;

        if let Some(cached) = guard.as_ref() {
            if Instant::now() < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
        }

        debug!("Requesting PayPal access token");
        let response = self
            .client
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| PaymentError::NetworkError(e.to_string()))?;

        let token: TokenResponse = Self::read_json(response).await?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EARLY_EXPIRY);

        *guard = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(token.access_token)
    }

    async fn authorized(&self, builder: RequestBuilder) -> PaymentResult<RequestBuilder> {
        Ok(builder.bearer_auth(self.access_token().await?))
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> PaymentResult<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            error!("PayPal API error: status={}, body={}", status, body);
            let message = serde_json::from_str::<PaypalErrorResponse>(&body)
                .map(|e| e.describe())
                .unwrap_or_else(|_| format!("HTTP {}: {}", status, body));
            return Err(Self::provider_error(message));
        }

        serde_json::from_str(&body)
            .map_err(|e| Self::provider_error(format!("unreadable response: {}", e)))
    }

    fn order_body(&self, order: &Order, subject: &str) -> serde_json::Value {
        serde_json::json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": order.order_no.as_str(),
                "custom_id": order.order_no.as_str(),
                "description": subject,
                "amount": {
                    "currency_code": order.total_amount.currency.as_str().to_ascii_uppercase(),
                    "value": order.total_amount.to_decimal_string(),
                },
            }],
            "application_context": {
                "return_url": self.config.return_url,
                "cancel_url": self.config.cancel_url,
                "brand_name": self.config.brand_name,
                "user_action": "PAY_NOW",
            },
        })
    }

    /// Capture an approved order and report the capture outcome.
    #[instrument(skip(self, amount, raw_payload))]
    async fn capture(
        &self,
        paypal_order_id: &str,
        order_no: OrderNo,
        amount: Option<Price>,
        raw_payload: serde_json::Value,
    ) -> PaymentResult<CallbackResult> {
        let request = self
            .client
            .post(self.url(&format!("/v2/checkout/orders/{}/capture", paypal_order_id)))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=representation")
            .header("PayPal-Request-Id", format!("capture-{}", paypal_order_id));
        let response = self
            .authorized(request)
            .await?
            .send()
            .await
            .map_err(|e| PaymentError::NetworkError(e.to_string()))?;

        // A redelivered APPROVED event after a successful capture; the
        // PAYMENT.CAPTURE.COMPLETED event settles the order.
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            if body.contains("ORDER_ALREADY_CAPTURED") {
                info!("PayPal order {} already captured", paypal_order_id);
                return Ok(CallbackResult {
                    external_trade_id: paypal_order_id.to_string(),
                    order_no,
                    trade_status: TradeStatus::Pending,
                    amount,
                    raw_payload,
                    payment_type: PaymentType::Paypal,
                });
            }
            return Err(Self::provider_error(format!("capture rejected: {}", body)));
        }

        let captured: PaypalOrder = Self::read_json(response).await?;
        let capture = captured
            .purchase_units
            .iter()
            .filter_map(|unit| unit.payments.as_ref())
            .flat_map(|payments| payments.captures.iter())
            .next();

        let (external_trade_id, trade_status, amount) = match capture {
            Some(capture) => (
                capture.id.clone(),
                TradeStatus::normalize(&capture.status),
                match capture.amount.as_ref() {
                    Some(money) => Some(money.to_price()?),
                    None => amount,
                },
            ),
            None => {
                warn!("PayPal capture returned no captures: status={}", captured.status);
                (captured.id.clone(), TradeStatus::Pending, amount)
            }
        };

        info!(
            "Captured PayPal order {}: capture={}, status={}",
            paypal_order_id,
            external_trade_id,
            trade_status.as_label()
        );

        Ok(CallbackResult {
            external_trade_id,
            order_no,
            // Anything short of COMPLETED waits for a PAYMENT.CAPTURE.* event
            trade_status: match trade_status {
                TradeStatus::Success => TradeStatus::Success,
                _ => TradeStatus::Pending,
            },
            amount,
            raw_payload,
            payment_type: PaymentType::Paypal,
        })
    }
}

#[async_trait]
impl PaymentGateway for PaypalGateway {
    #[instrument(skip(self, order, subject), fields(order_no = %order.order_no))]
    async fn create_payment(
        &self,
        order: &Order,
        subject: &str,
    ) -> PaymentResult<CheckoutArtifact> {
        let request = self
            .client
            .post(self.url("/v2/checkout/orders"))
            .header("Prefer", "return=representation")
            .header("PayPal-Request-Id", order.order_no.as_str())
            .json(&self.order_body(order, subject));
        let response = self
            .authorized(request)
            .await?
            .send()
            .await
            .map_err(|e| PaymentError::NetworkError(e.to_string()))?;

        let created: OrderResponse = Self::read_json(response).await?;
        let approve = created
            .links
            .into_iter()
            .find(|link| link.rel == "approve" || link.rel == "payer-action")
            .ok_or_else(|| Self::provider_error("approve link not found in response"))?;

        info!("Created PayPal order: id={}", created.id);
        Ok(CheckoutArtifact::RedirectUrl { url: approve.href })
    }

    /// Delegates to `verify-webhook-signature` with the configured webhook id.
    #[instrument(skip(self, request))]
    async fn verify_callback(&self, request: &CallbackRequest) -> PaymentResult<()> {
        let transmission_sig = match request.header("paypal-transmission-sig") {
            Some(sig) if !sig.is_empty() => sig,
            _ => request.require_header("paypal-transmission-signature")?,
        };
        let webhook_event = request.json()?;

        let body = serde_json::json!({
            "auth_algo": request.require_header("paypal-auth-algo")?,
            "cert_url": request.require_header("paypal-cert-url")?,
            "transmission_id": request.require_header("paypal-transmission-id")?,
            "transmission_sig": transmission_sig,
            "transmission_time": request.require_header("paypal-transmission-time")?,
            "webhook_id": self.config.webhook_id,
            "webhook_event": webhook_event,
        });

        let call = self
            .client
            .post(self.url("/v1/notifications/verify-webhook-signature"))
            .json(&body);
        let response = self
            .authorized(call)
            .await?
            .send()
            .await
            .map_err(|e| PaymentError::NetworkError(e.to_string()))?;

        let verdict: VerifyResponse = Self::read_json(response).await?;
        if verdict.verification_status == "SUCCESS" {
            Ok(())
        } else {
            Err(PaymentError::WebhookVerificationFailed(format!(
                "PayPal verification_status {}",
                verdict.verification_status
            )))
        }
    }

    async fn process_callback(&self, request: &CallbackRequest) -> PaymentResult<CallbackResult> {
        match classify_event(&request.body)? {
            EventAction::Settle(result) => Ok(result),
            EventAction::Capture {
                paypal_order_id,
                order_no,
                amount,
                raw_payload,
            } => {
                self.capture(&paypal_order_id, order_no, amount, raw_payload)
                    .await
            }
        }
    }

    fn payment_type(&self) -> PaymentType {
        PaymentType::Paypal
    }
}

// =============================================================================
// PayPal API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    verification_status: String,
}

#[derive(Debug, Deserialize)]
struct PaypalErrorResponse {
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl PaypalErrorResponse {
    fn describe(&self) -> String {
        match &self.error_description {
            Some(desc) => desc.clone(),
            None => format!("{}: {}", self.name, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pay_core::{Currency, NewOrderLine};
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> PaypalGateway {
        PaypalGateway::new(PaypalConfig::new("client", "secret", "WH-TEST").with_api_base_url(server.uri()))
            .unwrap()
    }

    async fn mount_token(server: &MockServer, expires_in: u64, calls: u64) {
        Mock::given(method("POST"))
            .and(path("/v1/oauth2/token"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "A21AA-token",
                "token_type": "Bearer",
                "expires_in": expires_in,
            })))
            .expect(calls)
            .mount(server)
            .await;
    }

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

    fn order_created() -> ResponseTemplate {
        ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": "5O190127TN364715T",
            "status": "CREATED",
            "links": [
                {"href": "https://api-m.sandbox.paypal.com/v2/checkout/orders/5O190127TN364715T", "rel": "self", "method": "GET"},
                {"href": "https://www.sandbox.paypal.com/checkoutnow?token=5O190127TN364715T", "rel": "approve", "method": "GET"}
            ]
        }))
    }

    fn signed_request(body: serde_json::Value) -> CallbackRequest {
        CallbackRequest::new(body.to_string())
            .with_header("PAYPAL-TRANSMISSION-ID", "69cd13f0-d67a-11e5-baa3-778b53f4ae55")
            .with_header("PAYPAL-TRANSMISSION-TIME", "2016-02-18T20:01:35Z")
            .with_header("PAYPAL-TRANSMISSION-SIG", "lmI95Jx3Y9nhR5SJWlHVIWpg4AgFk7n9bCHSRxbrd8A9zrhdu2rMyFrmz+Zjh3s3boXB07VXCXUZy/UFzUlnGJn0wDugt7FlSvdKeIJenLRemUxYCPVoEZzg9VFNqOa48gMkvF+XTpxBeUx/kWy6B5cp7GkT2+pOowfRK7OaynuxUoKW3JcMWw272VKjLTtTAShncla7tGF+55rxyt2KNZIIqxNMJ48RDZheGU5w1npu9dZHnPgTXB9iomeVRoD8O/jhRpnKsGrDschyNdkeh81BJJMH4Ctc6lnCCquoP/GzCzz33MMsNdid7vL/NIWaCsekQpW26FpWPi/tfj8nLA==")
            .with_header("PAYPAL-CERT-URL", "https://api.sandbox.paypal.com/v1/notifications/certs/CERT-360caa42-fca2a594-1d93a270")
            .with_header("PAYPAL-AUTH-ALGO", "SHA256withRSA")
    }

    #[tokio::test]
    async fn test_create_payment_returns_approve_link_and_caches_token() {
        let server = MockServer::start().await;
        mount_token(&server, 32400, 1).await;

        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders"))
            .and(header("authorization", "Bearer A21AA-token"))
            .and(body_partial_json(serde_json::json!({
                "intent": "CAPTURE",
                "purchase_units": [{"amount": {"currency_code": "USD", "value": "99.00"}}]
            })))
            .respond_with(order_created())
            .expect(2)
            .mount(&server)
            .await;

        let gw = gateway(&server);
        for _ in 0..2 {
            let artifact = gw.create_payment(&order(), "Rust Agent").await.unwrap();
            assert_eq!(
                artifact,
                CheckoutArtifact::RedirectUrl {
                    url: "https://www.sandbox.paypal.com/checkoutnow?token=5O190127TN364715T"
                        .to_string()
                }
            );
        }
    }

    #[tokio::test]
    async fn test_short_lived_token_is_refreshed() {
        let server = MockServer::start().await;
        // Lifetime under the early-expiry margin: every call refreshes
        mount_token(&server, 30, 2).await;

        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders"))
            .respond_with(order_created())
            .mount(&server)
            .await;

        let gw = gateway(&server);
        gw.create_payment(&order(), "Rust Agent").await.unwrap();
        gw.create_payment(&order(), "Rust Agent").await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_callback_success_and_failure() {
        let server = MockServer::start().await;
        mount_token(&server, 32400, 1).await;

        Mock::given(method("POST"))
            .and(path("/v1/notifications/verify-webhook-signature"))
            .and(body_partial_json(serde_json::json!({
                "webhook_id": "WH-TEST",
                "transmission_id": "69cd13f0-d67a-11e5-baa3-778b53f4ae55"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"verification_status": "SUCCESS"})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/notifications/verify-webhook-signature"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"verification_status": "FAILURE"})),
            )
            .mount(&server)
            .await;

        let gw = gateway(&server);
        let req = signed_request(serde_json::json!({"event_type": "PAYMENT.CAPTURE.COMPLETED"}));

        gw.verify_callback(&req).await.unwrap();
        assert!(matches!(
            gw.verify_callback(&req).await,
            Err(PaymentError::WebhookVerificationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_transmission_headers_rejected() {
        let server = MockServer::start().await;
        let gw = gateway(&server);
        let req = CallbackRequest::new(r#"{"event_type":"PAYMENT.CAPTURE.COMPLETED"}"#);

        assert!(matches!(
            gw.verify_callback(&req).await,
            Err(PaymentError::WebhookVerificationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_approved_event_captures_order() {
        let server = MockServer::start().await;
        mount_token(&server, 32400, 1).await;

        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders/5O190127TN364715T/capture"))
            .and(header("paypal-request-id", "capture-5O190127TN364715T"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": "5O190127TN364715T",
                "status": "COMPLETED",
                "purchase_units": [{
                    "reference_id": "abc123",
                    "payments": {"captures": [{
                        "id": "3C679366HH908993F",
                        "status": "COMPLETED",
                        "amount": {"currency_code": "USD", "value": "99.00"}
                    }]}
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let req = CallbackRequest::new(
            serde_json::json!({
                "event_type": "CHECKOUT.ORDER.APPROVED",
                "resource": {
                    "id": "5O190127TN364715T",
                    "status": "APPROVED",
                    "purchase_units": [{
                        "reference_id": "abc123",
                        "custom_id": "abc123",
                        "amount": {"currency_code": "USD", "value": "99.00"}
                    }]
                }
            })
            .to_string(),
        );

        let result = gateway(&server).process_callback(&req).await.unwrap();
        assert_eq!(result.order_no.as_str(), "abc123");
        assert_eq!(result.external_trade_id, "3C679366HH908993F");
        assert_eq!(result.trade_status, TradeStatus::Success);
        assert_eq!(result.amount, Some(Price::from_minor(9900, Currency::USD)));
    }

    #[tokio::test]
    async fn test_provider_rejection_is_gateway_error() {
        let server = MockServer::start().await;
        mount_token(&server, 32400, 1).await;

        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "name": "INVALID_REQUEST",
                "message": "Request is not well-formed"
            })))
            .mount(&server)
            .await;

        let err = gateway(&server)
            .create_payment(&order(), "Rust Agent")
            .await
            .unwrap_err();
        assert!(err.is_gateway_error());
        assert_eq!(err.error_code(), "gateway_error");
    }
}
