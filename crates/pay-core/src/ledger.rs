//! # Settlement Ledger
//!
//! Order state machine driven by verified callbacks.
//!
//! ```text
//!            success              refund (not performed here)
//!  Pending ───────────▶ Paid ─────────────────▶ Refunded
//!     │
//!     │ closed
//!     ▼
//!  Cancelled
//! ```
//!
//! [`plan_settlement`] decides what a callback does to an order given the
//! transactions already recorded. It is pure; every [`LedgerStore`] runs it
//! inside a single atomic read-modify-write so that concurrent deliveries of
//! the same notification serialize and at most one success transaction exists
//! per `(order_id, external_transaction_id)`.

use crate::callback::{CallbackResult, PaymentType, TradeStatus};
use crate::error::PaymentResult;
use crate::money::Price;
use crate::order::{Order, OrderNo, OrderStatus, Transaction, TransactionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

/// What a callback did (or refused to do) to its order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// Pending → Paid, transaction recorded
    Settled,
    /// Redelivery of an already applied success
    AlreadySettled,
    /// Paid order received success for a different provider trade
    CaptureConflict { existing_external_id: String },
    /// Success arrived for an order that is no longer payable
    PaymentOnClosedOrder { status: OrderStatus },
    /// Pending → Cancelled
    Cancelled,
    /// Nothing to do
    Ignored,
    /// Status string outside the known vocabulary
    Unrecognized { raw_status: String },
}

impl SettlementOutcome {
    /// Emit the log line this outcome deserves.
    pub fn log(&self, order_no: &OrderNo, provider: PaymentType) {
        match self {
            SettlementOutcome::Settled => {
                info!(order_no = %order_no, provider = %provider, "order settled");
            }
            SettlementOutcome::AlreadySettled => {
                info!(order_no = %order_no, provider = %provider, "duplicate success callback ignored");
            }
            SettlementOutcome::CaptureConflict {
                existing_external_id,
            } => {
                error!(
                    order_no = %order_no,
                    provider = %provider,
                    existing_external_id = %existing_external_id,
                    "reconciliation alert: second capture reported for paid order"
                );
            }
            SettlementOutcome::PaymentOnClosedOrder { status } => {
                error!(
                    order_no = %order_no,
                    provider = %provider,
                    status = %status,
                    "reconciliation alert: payment reported for closed order"
                );
            }
            SettlementOutcome::Cancelled => {
                info!(order_no = %order_no, provider = %provider, "order cancelled by provider");
            }
            SettlementOutcome::Ignored => {}
            SettlementOutcome::Unrecognized { raw_status } => {
                warn!(
                    order_no = %order_no,
                    provider = %provider,
                    raw_status = %raw_status,
                    "unrecognized trade status, order unchanged"
                );
            }
        }
    }
}

/// Mutation a store must apply atomically
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementPlan {
    pub outcome: SettlementOutcome,
    pub new_status: Option<OrderStatus>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_method: Option<PaymentType>,
    pub transaction: Option<Transaction>,
    /// Reported amount when it differs from the order total
    pub amount_mismatch: Option<Price>,
}

impl SettlementPlan {
    fn unchanged(outcome: SettlementOutcome) -> Self {
        Self {
            outcome,
            new_status: None,
            paid_at: None,
            payment_method: None,
            transaction: None,
            amount_mismatch: None,
        }
    }

    pub fn changes_order(&self) -> bool {
        self.new_status.is_some()
    }

    /// Apply the order-side mutation to an in-memory order
    pub fn apply_to(&self, order: &mut Order) {
        if let Some(status) = self.new_status {
            order.status = status;
        }
        if self.paid_at.is_some() {
            order.paid_at = self.paid_at;
        }
        if self.payment_method.is_some() {
            order.payment_method = self.payment_method;
        }
    }
}

/// Decide the effect of `result` on `order`.
pub fn plan_settlement(
    order: &Order,
    existing: &[Transaction],
    result: &CallbackResult,
    now: DateTime<Utc>,
) -> SettlementPlan {
    match &result.trade_status {
        TradeStatus::Success => plan_success(order, existing, result, now),
        TradeStatus::Closed => {
            if order.status == OrderStatus::Pending {
                SettlementPlan {
                    new_status: Some(OrderStatus::Cancelled),
                    ..SettlementPlan::unchanged(SettlementOutcome::Cancelled)
                }
            } else {
                SettlementPlan::unchanged(SettlementOutcome::Ignored)
            }
        }
        TradeStatus::Pending => SettlementPlan::unchanged(SettlementOutcome::Ignored),
        TradeStatus::Unrecognized(raw) => {
            SettlementPlan::unchanged(SettlementOutcome::Unrecognized {
                raw_status: raw.clone(),
            })
        }
    }
}

fn plan_success(
    order: &Order,
    existing: &[Transaction],
    result: &CallbackResult,
    now: DateTime<Utc>,
) -> SettlementPlan {
    let prior_success = existing
        .iter()
        .find(|t| t.order_id == order.id && t.status == TransactionStatus::Success);

    match order.status {
        OrderStatus::Cancelled | OrderStatus::Refunded => {
            return SettlementPlan::unchanged(SettlementOutcome::PaymentOnClosedOrder {
                status: order.status,
            });
        }
        OrderStatus::Paid => {
            return match prior_success {
                Some(t) if t.external_transaction_id != result.external_trade_id => {
                    SettlementPlan::unchanged(SettlementOutcome::CaptureConflict {
                        existing_external_id: t.external_transaction_id.clone(),
                    })
                }
                _ => SettlementPlan::unchanged(SettlementOutcome::AlreadySettled),
            };
        }
        OrderStatus::Pending => {}
    }

    if let Some(t) = prior_success {
        if t.external_transaction_id != result.external_trade_id {
            return SettlementPlan::unchanged(SettlementOutcome::CaptureConflict {
                existing_external_id: t.external_transaction_id.clone(),
            });
        }
    }

    let amount = result.amount.unwrap_or(order.total_amount);
    let amount_mismatch = (amount != order.total_amount).then_some(amount);

    let transaction = match prior_success {
        Some(_) => None,
        None => Some(Transaction {
            id: Uuid::new_v4(),
            order_id: order.id,
            payment_channel: result.payment_type,
            external_transaction_id: result.external_trade_id.clone(),
            amount,
            status: TransactionStatus::Success,
            raw_response: result.raw_payload.clone(),
            created_at: now,
            updated_at: now,
        }),
    };

    SettlementPlan {
        outcome: SettlementOutcome::Settled,
        new_status: Some(OrderStatus::Paid),
        paid_at: Some(now),
        payment_method: Some(result.payment_type),
        transaction,
        amount_mismatch,
    }
}

/// Result of applying a callback, returned by every store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettlementReport {
    pub order_id: Uuid,
    pub order_no: OrderNo,
    pub outcome: SettlementOutcome,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<Transaction>,
}

impl SettlementReport {
    pub fn new(order: &Order, plan: SettlementPlan) -> Self {
        Self {
            order_id: order.id,
            order_no: order.order_no.clone(),
            outcome: plan.outcome,
            status: order.status,
            transaction: plan.transaction,
        }
    }
}

/// Log the plan's side notes (amount mismatch) and its outcome
pub fn log_plan(plan: &SettlementPlan, order: &Order, provider: PaymentType) {
    if let Some(reported) = plan.amount_mismatch {
        warn!(
            order_no = %order.order_no,
            expected = %order.total_amount.display(),
            reported = %reported.display(),
            "callback amount differs from order total; recording reported amount"
        );
    }
    plan.outcome.log(&order.order_no, provider);
}

/// Pagination request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PageRequest {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

impl PageRequest {
    pub const MAX_PAGE_SIZE: u32 = 100;

    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }.normalized()
    }

    /// Clamp to page ≥ 1 and 1 ≤ page_size ≤ 100
    pub fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            page_size: if self.page_size == 0 {
                default_page_size()
            } else {
                self.page_size.min(Self::MAX_PAGE_SIZE)
            },
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page.saturating_sub(1) as u64) * self.page_size as u64
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

/// One page of results
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub list: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Durable order/transaction storage
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Persist a new order together with its items, as one unit.
    async fn create_order(&self, order: &Order) -> PaymentResult<()>;

    async fn find_order(&self, order_id: Uuid) -> PaymentResult<Option<Order>>;

    async fn find_order_for_user(
        &self,
        order_id: Uuid,
        user_id: Uuid,
    ) -> PaymentResult<Option<Order>>;

    async fn find_order_by_no(&self, order_no: &OrderNo) -> PaymentResult<Option<Order>>;

    /// Newest first
    async fn list_orders_for_user(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> PaymentResult<Page<Order>>;

    /// True if the user holds a Paid order containing the skill
    async fn has_paid_for_skill(&self, user_id: Uuid, skill_id: Uuid) -> PaymentResult<bool>;

    /// Apply a verified callback atomically.
    ///
    /// Fails with `OrderNotFound` when `result.order_no` is unknown.
    async fn apply_callback(&self, result: &CallbackResult) -> PaymentResult<SettlementReport>;

    async fn transactions_for_order(&self, order_id: Uuid) -> PaymentResult<Vec<Transaction>>;
}
