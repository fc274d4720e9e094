//! # Request Handlers
//!
//! Axum request handlers for checkout, order listing and provider callbacks.
//! JSON endpoints answer with the `{code, message, data}` envelope; callbacks
//! answer with whatever body the provider expects.

use crate::auth::CurrentUser;
use crate::checkout::PaymentLink;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use pay_core::{
    CallbackAck, CallbackRequest, CheckoutArtifact, Order, OrderNo, Page, PageRequest,
    PaymentError, PaymentType,
};
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};
use uuid::Uuid;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Create order request
#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub skill_id: Uuid,
}

/// Pay order request; the body is optional
#[derive(Debug, Default, Deserialize)]
pub struct PayOrderRequest {
    #[serde(default)]
    pub provider: Option<String>,
}

/// Success envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: &'static str,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            code: 0,
            message: "success",
            data,
        })
    }
}

/// `data` of a successful pay request
#[derive(Debug, Serialize)]
pub struct PaymentLinkResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publishable_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_url: Option<String>,
    pub order_id: Uuid,
    pub order_no: OrderNo,
    pub provider: PaymentType,
}

impl From<PaymentLink> for PaymentLinkResponse {
    fn from(link: PaymentLink) -> Self {
        let mut response = Self {
            payment_url: None,
            client_secret: None,
            publishable_key: None,
            code_url: None,
            order_id: link.order_id,
            order_no: link.order_no,
            provider: link.provider,
        };
        match link.artifact {
            CheckoutArtifact::RedirectUrl { url } => response.payment_url = Some(url),
            CheckoutArtifact::ClientSecret {
                client_secret,
                publishable_key,
            } => {
                response.client_secret = Some(client_secret);
                response.publishable_key = Some(publishable_key);
            }
            CheckoutArtifact::QrCode { code_url } => response.code_url = Some(code_url),
        }
        response
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn payment_error_to_response(err: PaymentError) -> ApiError {
    let code = err.status_code();
    if code >= 500 {
        error!(error = %err, error_code = err.error_code(), "request failed");
    }
    let response = ErrorResponse::new(err.error_code(), code).with_details(err.to_string());
    (
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(response),
    )
}

fn invalid_body(rejection: JsonRejection) -> ApiError {
    payment_error_to_response(PaymentError::InvalidRequest(rejection.body_text()))
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "skill-pay",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Create a Pending order for one skill
#[instrument(skip(state, user, payload), fields(user_id = %user.user_id))]
pub async fn create_order(
    State(state): State<AppState>,
    user: CurrentUser,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Order>>, ApiError> {
    let Json(request) = payload.map_err(invalid_body)?;
    let order = state
        .checkout
        .create_order(user.user_id, request.skill_id)
        .await
        .map_err(payment_error_to_response)?;
    Ok(ApiResponse::ok(order))
}

/// Caller's orders, newest first
pub async fn list_orders(
    State(state): State<AppState>,
    user: CurrentUser,
    page: Result<Query<PageRequest>, QueryRejection>,
) -> Result<Json<ApiResponse<Page<Order>>>, ApiError> {
    let Query(page) = page.map_err(|e| {
        payment_error_to_response(PaymentError::InvalidRequest(e.body_text()))
    })?;
    let page = page.normalized();
    let orders = state
        .checkout
        .list_orders(user.user_id, page)
        .await
        .map_err(payment_error_to_response)?;
    Ok(ApiResponse::ok(orders))
}

/// Checkout artifact for a Pending order
#[instrument(skip(state, user, body), fields(user_id = %user.user_id, order_id = %order_id))]
pub async fn pay_order(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(order_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<ApiResponse<PaymentLinkResponse>>, ApiError> {
    let request: PayOrderRequest = if body.iter().all(u8::is_ascii_whitespace) {
        PayOrderRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            payment_error_to_response(PaymentError::InvalidRequest(format!(
                "invalid request body: {}",
                e
            )))
        })?
    };

    let provider = request
        .provider
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .map(str::parse::<PaymentType>)
        .transpose()
        .map_err(payment_error_to_response)?;

    let link = state
        .checkout
        .payment_artifact(user.user_id, order_id, provider)
        .await
        .map_err(payment_error_to_response)?;
    Ok(ApiResponse::ok(link.into()))
}

fn callback_request(headers: &HeaderMap, body: Bytes) -> CallbackRequest {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .fold(CallbackRequest::new(body.to_vec()), |request, (name, value)| {
            request.with_header(name, value)
        })
}

fn ack_response(ack: CallbackAck) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, ack.content_type)],
        ack.body,
    )
        .into_response()
}

async fn handle_callback(
    state: &AppState,
    provider: PaymentType,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = callback_request(&headers, body);
    match state.callbacks.handle(provider, &request).await {
        Ok(receipt) => ack_response(receipt.ack),
        Err(e) => payment_error_to_response(e).into_response(),
    }
}

/// Alipay asynchronous notification (form body)
pub async fn alipay_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_callback(&state, PaymentType::Alipay, headers, body).await
}

/// Stripe webhook (raw JSON, `Stripe-Signature`)
pub async fn stripe_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_callback(&state, PaymentType::Stripe, headers, body).await
}

/// WeChat Pay notification (XML body)
pub async fn wechat_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_callback(&state, PaymentType::Wechat, headers, body).await
}

/// PayPal webhook (raw JSON, transmission headers)
pub async fn paypal_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_callback(&state, PaymentType::Paypal, headers, body).await
}

pub async fn mock_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_callback(&state, PaymentType::Mock, headers, body).await
}
