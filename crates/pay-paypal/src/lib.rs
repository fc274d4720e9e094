//! # pay-paypal
//!
//! PayPal Orders v2 adapter.
//!
//! Checkout creates an order with `intent=CAPTURE` and redirects the buyer to
//! its `approve` link. Webhooks are verified by PayPal's
//! `verify-webhook-signature` endpoint against the configured webhook id.
//!
//! ## Events
//!
//! | Event | Result |
//! |---|---|
//! | `CHECKOUT.ORDER.APPROVED` | capture, then Success or Pending |
//! | `PAYMENT.CAPTURE.COMPLETED` | Success |
//! | `PAYMENT.CAPTURE.PENDING` | Pending |
//! | `PAYMENT.CAPTURE.DENIED`, `CHECKOUT.ORDER.VOIDED` | Closed |
//!
//! Anything else is acknowledged and ignored.

pub mod config;
pub mod gateway;
pub mod webhook;

pub use config::{PaypalConfig, PaypalMode};
pub use gateway::PaypalGateway;
pub use webhook::REQUIRED_WEBHOOK_EVENTS;
