//! # pay-stripe
//!
//! Stripe gateway adapter for skill-pay.
//!
//! Two checkout flows, chosen by `STRIPE_FLOW`:
//!
//! 1. **Checkout Session** (default) - hosted page, buyer is redirected
//! 2. **PaymentIntent** - frontend confirms with the returned client secret
//!
//! Both attach `metadata[order_no]` (on the session and on its PaymentIntent)
//! and send `Idempotency-Key: <order_no>`.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pay_stripe::{StripeConfig, StripeGateway};
//! use pay_core::PaymentGateway;
//!
//! if let Some(config) = StripeConfig::from_env()? {
//!     let gateway = StripeGateway::new(config)?;
//!     let artifact = gateway.create_payment(&order, "Rust Refactoring Agent").await?;
//! }
//! ```
//!
//! ## Webhook Handling
//!
//! ```rust,ignore
//! gateway.verify_callback(&request).await?;   // Stripe-Signature, 300 s tolerance
//! let result = gateway.process_callback(&request).await?;
//! ```

pub mod checkout;
pub mod config;
pub mod webhook;

// Re-exports
pub use checkout::StripeGateway;
pub use config::{StripeConfig, StripeFlow};
pub use webhook::REQUIRED_WEBHOOK_EVENTS;
