//! # Routes
//!
//! Axum router configuration for the payment API.

use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main application router
///
/// Routes:
/// - Orders (Bearer token required):
///   - POST /api/v1/payment/orders - Create order for a skill
///   - GET  /api/v1/payment/orders - List own orders (`page`, `page_size`)
///   - POST /api/v1/payment/orders/{order_id}/pay - Get checkout artifact
///
/// - Provider callbacks:
///   - POST /api/v1/payment/callback/{alipay,stripe,wechat,paypal}
///   - POST /api/v1/payment/callback/mock - only when mock payments are allowed
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let order_routes = Router::new()
        .route(
            "/orders",
            post(handlers::create_order).get(handlers::list_orders),
        )
        .route("/orders/{order_id}/pay", post(handlers::pay_order));

    // Callbacks read the raw body; signatures cover exact bytes
    let mut callback_routes = Router::new()
        .route("/alipay", post(handlers::alipay_callback))
        .route("/stripe", post(handlers::stripe_callback))
        .route("/wechat", post(handlers::wechat_callback))
        .route("/paypal", post(handlers::paypal_callback));

    if state.config.allow_mock {
        callback_routes = callback_routes.route("/mock", post(handlers::mock_callback));
    }

    let payment_routes = Router::new()
        .merge(order_routes)
        .nest("/callback", callback_routes);

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1/payment", payment_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::issue_token;
    use crate::factory::{GatewayConfig, GatewayRegistry};
    use crate::state::AppConfig;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use pay_core::{
        Currency, LedgerStore, OrderNo, OrderStatus, PaymentType, Price, Skill, SkillCatalog,
    };
    use pay_ledger::InMemoryLedger;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use uuid::Uuid;

    const SECRET: &str = "test-secret";

    struct TestApp {
        server: TestServer,
        ledger: Arc<InMemoryLedger>,
        skill_id: Uuid,
        user_id: Uuid,
        token: String,
    }

    fn app_with(allow_mock: bool) -> TestApp {
        let skill_id = Uuid::new_v4();
        let catalog = SkillCatalog::new().with_skill(Skill::paid(
            skill_id,
            "Rust Refactoring Agent",
            Price::from_minor(9900, Currency::CNY),
        ));

        let config = AppConfig {
            allow_mock,
            jwt_secret: SECRET.to_string(),
            ..AppConfig::development()
        };
        let mut gateway_config = GatewayConfig::mock_only(config.frontend_url.clone(), Currency::CNY);
        gateway_config.allow_mock = allow_mock;

        let ledger = Arc::new(InMemoryLedger::new());
        let state = AppState::from_parts(
            config,
            Arc::new(catalog),
            ledger.clone(),
            GatewayRegistry::build(&gateway_config).unwrap(),
        );

        let user_id = Uuid::new_v4();
        TestApp {
            server: TestServer::new(create_router(state)).unwrap(),
            ledger,
            skill_id,
            user_id,
            token: issue_token(SECRET, user_id, chrono::Duration::hours(1)),
        }
    }

    impl TestApp {
        async fn create_order(&self) -> Value {
            let response = self
                .server
                .post("/api/v1/payment/orders")
                .authorization_bearer(&self.token)
                .json(&json!({ "skill_id": self.skill_id }))
                .await;
            response.assert_status_ok();
            response.json::<Value>()["data"].clone()
        }

        async fn mock_callback(&self, order_no: &str, status: &str) -> axum_test::TestResponse {
            self.server
                .post("/api/v1/payment/callback/mock")
                .json(&json!({
                    "order_no": order_no,
                    "trade_status": status,
                    "payment_type": "alipay",
                    "trade_no": "2024010122001400000000000001",
                    "total_amount": "99.00",
                }))
                .await
        }

        async fn order(&self, order_no: &str) -> pay_core::Order {
            self.ledger
                .find_order_by_no(&OrderNo::from(order_no))
                .await
                .unwrap()
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_health() {
        let app = app_with(true);
        let response = app.server.get("/health").await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["status"], "healthy");
    }

    #[tokio::test]
    async fn test_purchase_settles_through_mock_callback() {
        let app = app_with(true);

        let order = app.create_order().await;
        assert_eq!(order["status"], "pending");
        let order_id = order["id"].as_str().unwrap().to_string();
        let order_no = order["order_no"].as_str().unwrap().to_string();

        let pay = app
            .server
            .post(&format!("/api/v1/payment/orders/{}/pay", order_id))
            .authorization_bearer(&app.token)
            .await;
        pay.assert_status_ok();
        let body = pay.json::<Value>();
        assert_eq!(body["code"], 0);
        assert_eq!(body["message"], "success");
        assert_eq!(body["data"]["order_no"], order_no.as_str());
        assert_eq!(body["data"]["provider"], "mock");
        assert!(body["data"]["payment_url"]
            .as_str()
            .unwrap()
            .contains(&order_no));

        let ack = app.mock_callback(&order_no, "TRADE_SUCCESS").await;
        ack.assert_status_ok();
        ack.assert_text("success");

        let stored = app.order(&order_no).await;
        assert_eq!(stored.status, OrderStatus::Paid);
        assert!(stored.paid_at.is_some());

        let txs = app.ledger.transactions_for_order(stored.id).await.unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].amount, Price::from_minor(9900, Currency::CNY));
        assert_eq!(txs[0].external_transaction_id, "2024010122001400000000000001");
        // the body claims alipay; mock deliveries are still booked as mock
        assert_eq!(txs[0].payment_channel, PaymentType::Mock);
        assert_eq!(stored.payment_method, Some(PaymentType::Mock));
    }

    #[tokio::test]
    async fn test_callback_for_unknown_order_is_not_found() {
        let app = app_with(true);

        let response = app.mock_callback(&OrderNo::generate().to_string(), "TRADE_SUCCESS").await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.json::<Value>()["error"], "order_not_found");
    }

    #[tokio::test]
    async fn test_duplicate_callback_records_one_transaction() {
        let app = app_with(true);
        let order = app.create_order().await;
        let order_no = order["order_no"].as_str().unwrap();

        app.mock_callback(order_no, "TRADE_SUCCESS").await.assert_status_ok();
        app.mock_callback(order_no, "TRADE_SUCCESS").await.assert_status_ok();

        let stored = app.order(order_no).await;
        assert_eq!(stored.status, OrderStatus::Paid);
        assert_eq!(
            app.ledger.transactions_for_order(stored.id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_close_cancels_pending_but_not_paid() {
        let app = app_with(true);

        let pending = app.create_order().await;
        let pending_no = pending["order_no"].as_str().unwrap();
        app.mock_callback(pending_no, "TRADE_CLOSED").await.assert_status_ok();
        assert_eq!(app.order(pending_no).await.status, OrderStatus::Cancelled);

        let paid = app.create_order().await;
        let paid_no = paid["order_no"].as_str().unwrap();
        app.mock_callback(paid_no, "TRADE_SUCCESS").await.assert_status_ok();
        app.mock_callback(paid_no, "TRADE_CLOSED").await.assert_status_ok();
        assert_eq!(app.order(paid_no).await.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_second_purchase_is_rejected() {
        let app = app_with(true);
        let order = app.create_order().await;
        app.mock_callback(order["order_no"].as_str().unwrap(), "TRADE_SUCCESS")
            .await
            .assert_status_ok();

        let response = app
            .server
            .post("/api/v1/payment/orders")
            .authorization_bearer(&app.token)
            .json(&json!({ "skill_id": app.skill_id }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["error"], "already_purchased");
    }

    #[tokio::test]
    async fn test_order_endpoints_require_token() {
        let app = app_with(true);

        let response = app
            .server
            .post("/api/v1/payment/orders")
            .json(&json!({ "skill_id": app.skill_id }))
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);

        let forged = issue_token("wrong-secret", app.user_id, chrono::Duration::hours(1));
        let response = app
            .server
            .get("/api/v1/payment/orders")
            .authorization_bearer(&forged)
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(response.json::<Value>()["code"], 401);
    }

    #[tokio::test]
    async fn test_unknown_skill_and_bad_body() {
        let app = app_with(true);

        let response = app
            .server
            .post("/api/v1/payment/orders")
            .authorization_bearer(&app.token)
            .json(&json!({ "skill_id": Uuid::new_v4() }))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);

        let response = app
            .server
            .post("/api/v1/payment/orders")
            .authorization_bearer(&app.token)
            .json(&json!({ "skill": "nope" }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_order_listing_pages() {
        let app = app_with(true);
        for _ in 0..3 {
            // each order is for the same unpaid skill, so creation is allowed
            app.create_order().await;
        }

        let response = app
            .server
            .get("/api/v1/payment/orders")
            .add_query_param("page", 2)
            .add_query_param("page_size", 2)
            .authorization_bearer(&app.token)
            .await;
        response.assert_status_ok();

        let data = &response.json::<Value>()["data"];
        assert_eq!(data["total"], 3);
        assert_eq!(data["page"], 2);
        assert_eq!(data["page_size"], 2);
        assert_eq!(data["list"].as_array().unwrap().len(), 1);
        assert_eq!(data["list"][0]["items"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pay_unknown_provider_is_bad_request() {
        let app = app_with(true);
        let order = app.create_order().await;

        let response = app
            .server
            .post(&format!(
                "/api/v1/payment/orders/{}/pay",
                order["id"].as_str().unwrap()
            ))
            .authorization_bearer(&app.token)
            .json(&json!({ "provider": "bitcoin" }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_mock_disallowed_hides_route_and_refuses_providers() {
        let app = app_with(false);

        let response = app.mock_callback(&OrderNo::generate().to_string(), "TRADE_SUCCESS").await;
        response.assert_status(StatusCode::NOT_FOUND);

        let response = app
            .server
            .post("/api/v1/payment/callback/alipay")
            .text("out_trade_no=abc&trade_status=TRADE_SUCCESS")
            .await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.json::<Value>()["error"], "provider_not_configured");

        let order = app.create_order().await;
        let response = app
            .server
            .post(&format!(
                "/api/v1/payment/orders/{}/pay",
                order["id"].as_str().unwrap()
            ))
            .authorization_bearer(&app.token)
            .await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(app.order(order["order_no"].as_str().unwrap()).await.status, OrderStatus::Pending);
    }
}
