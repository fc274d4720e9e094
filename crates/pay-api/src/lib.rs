//! # pay-api
//!
//! HTTP API layer for skill-pay.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - Order creation, listing and checkout endpoints
//! - One callback endpoint per payment provider
//! - The gateway factory and registry
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | POST | `/api/v1/payment/orders` | Create order |
//! | GET | `/api/v1/payment/orders` | List own orders |
//! | POST | `/api/v1/payment/orders/{id}/pay` | Checkout artifact |
//! | POST | `/api/v1/payment/callback/alipay` | Alipay notify |
//! | POST | `/api/v1/payment/callback/stripe` | Stripe webhook |
//! | POST | `/api/v1/payment/callback/wechat` | WeChat Pay notify |
//! | POST | `/api/v1/payment/callback/paypal` | PayPal webhook |
//! | POST | `/api/v1/payment/callback/mock` | Mock (when allowed) |

pub mod auth;
pub mod checkout;
pub mod factory;
pub mod handlers;
pub mod routes;
pub mod state;

pub use factory::{Gateway, GatewayConfig, GatewayRegistry};
pub use routes::create_router;
pub use state::{AppConfig, AppState};
