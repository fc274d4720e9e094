//! # pay-ledger
//!
//! [`LedgerStore`](pay_core::LedgerStore) implementations.
//!
//! - [`InMemoryLedger`] - one mutex over all state; development and tests
//! - [`PgLedger`] - PostgreSQL via sqlx, row lock per callback
//!
//! Both run [`plan_settlement`](pay_core::plan_settlement) inside their atomic
//! unit, so two deliveries of the same notification can never both record a
//! success transaction.

pub mod memory;
pub mod postgres;
pub mod skills;

pub use memory::InMemoryLedger;
pub use postgres::{connect, PgLedger};
pub use skills::PgSkillDirectory;
