//! # pay-wechat
//!
//! WeChat Pay v2 adapter: XML over HTTPS, HMAC-SHA256 signatures.
//!
//! Checkout returns a `code_url` for a NATIVE (scan-to-pay) order.
//! Notifications are XML and are answered with an XML acknowledgment.

pub mod config;
pub mod gateway;
pub mod xml;

pub use config::WechatConfig;
pub use gateway::{sign_params, WechatGateway};
