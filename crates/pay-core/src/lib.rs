//! # pay-core
//!
//! Core types and traits for the skill-pay settlement engine.
//!
//! This crate provides:
//! - `PaymentGateway` trait every provider adapter implements
//! - `Order`, `OrderItem`, `Transaction` and the `Price` money type
//! - `CallbackRequest` / `CallbackResult` for provider notifications
//! - The canonicalizer and RSA / HMAC signing primitives
//! - `plan_settlement` and the `LedgerStore` trait for the order state machine
//! - `MockGateway` for development
//! - `PaymentError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use pay_core::{CallbackRequest, LedgerStore, PaymentGateway};
//!
//! // Checkout
//! let artifact = gateway.create_payment(&order, "Rust Refactoring Agent").await?;
//!
//! // Later, in the callback endpoint
//! gateway.verify_callback(&request).await?;
//! let result = gateway.process_callback(&request).await?;
//! let report = ledger.apply_callback(&result).await?;
//! ```

pub mod callback;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod mock;
pub mod money;
pub mod order;
pub mod signer;
pub mod skill;

// Re-exports for convenience
pub use callback::{CallbackRequest, CallbackResult, PaymentType, TradeStatus};
pub use error::{PaymentError, PaymentResult};
pub use gateway::{CallbackAck, CheckoutArtifact, PaymentGateway};
pub use ledger::{
    log_plan, plan_settlement, LedgerStore, Page, PageRequest, SettlementOutcome,
    SettlementPlan, SettlementReport,
};
pub use mock::MockGateway;
pub use money::{Currency, Price};
pub use order::{
    NewOrderLine, Order, OrderItem, OrderNo, OrderStatus, Transaction, TransactionStatus,
};
pub use signer::{PrivateKeyFormat, PublicKeyFormat, RsaSigner, RsaVerifier};
pub use skill::{PriceType, Skill, SkillCatalog, SkillDirectory};
