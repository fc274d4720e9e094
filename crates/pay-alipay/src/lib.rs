//! # pay-alipay
//!
//! Alipay open-platform adapter (RSA2 / SHA256withRSA).
//!
//! Checkout produces a signed `alipay.trade.page.pay` redirect URL.
//! Asynchronous notifications are verified against the Alipay public key
//! and acknowledged with the literal body `success`.

pub mod config;
pub mod gateway;

pub use config::{AlipayConfig, LIVE_GATEWAY_URL, SANDBOX_GATEWAY_URL};
pub use gateway::AlipayGateway;
