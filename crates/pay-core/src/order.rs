//! # Order Types
//!
//! Orders, their line items and the append-only transaction records that
//! settle them.

use crate::callback::PaymentType;
use crate::error::{PaymentError, PaymentResult};
use crate::money::Price;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Externally visible order number.
///
/// 32 lowercase hex characters taken from a full v4 UUID. This fits every
/// provider's merchant-order-id limit (WeChat caps it at 32) and is the key
/// every callback is correlated on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNo(String);

impl OrderNo {
    /// Generate a fresh order number
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for OrderNo {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrderNo {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for OrderNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> PaymentResult<Self> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "refunded" => Ok(OrderStatus::Refunded),
            other => Err(PaymentError::Storage(format!(
                "unknown order status {:?}",
                other
            ))),
        }
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Paid)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Paid, OrderStatus::Refunded)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A line item in an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub skill_id: Uuid,
    /// Unit price at purchase time
    pub price: Price,
    pub quantity: u32,
}

impl OrderItem {
    /// Calculate the total price for this line item
    pub fn total(&self) -> PaymentResult<Price> {
        self.price.times(self.quantity)
    }
}

/// A purchase order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_no: OrderNo,
    pub user_id: Uuid,
    pub total_amount: Price,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<PaymentType>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub items: Vec<OrderItem>,
}

/// Line to be turned into an [`OrderItem`] by [`Order::create`]
#[derive(Debug, Clone, Copy)]
pub struct NewOrderLine {
    pub skill_id: Uuid,
    pub price: Price,
    pub quantity: u32,
}

impl Order {
    /// Build a new Pending order. The total is derived from the lines and
    /// fixed from here on.
    pub fn create(user_id: Uuid, lines: &[NewOrderLine]) -> PaymentResult<Self> {
        let first = lines
            .first()
            .ok_or_else(|| PaymentError::InvalidRequest("Order has no items".to_string()))?;
        let currency = first.price.currency;

        let id = Uuid::new_v4();
        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            if line.quantity == 0 {
                return Err(PaymentError::InvalidRequest(
                    "quantity must be at least 1".to_string(),
                ));
            }
            if line.price.currency != currency {
                return Err(PaymentError::UnsupportedCurrency {
                    currency: line.price.currency.to_string(),
                });
            }
            items.push(OrderItem {
                id: Uuid::new_v4(),
                order_id: id,
                skill_id: line.skill_id,
                price: line.price,
                quantity: line.quantity,
            });
        }
        let total = sum_line_totals(&items)?;

        Ok(Self {
            id,
            order_no: OrderNo::generate(),
            user_id,
            total_amount: Price::from_minor(total, currency),
            payment_method: None,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            paid_at: None,
            items,
        })
    }

    /// Sum of the line totals; equals `total_amount` for every stored order.
    pub fn items_total(&self) -> PaymentResult<Price> {
        Ok(Price::from_minor(
            sum_line_totals(&self.items)?,
            self.total_amount.currency,
        ))
    }

    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }

    pub fn contains_skill(&self, skill_id: Uuid) -> bool {
        self.items.iter().any(|i| i.skill_id == skill_id)
    }
}

fn sum_line_totals(items: &[OrderItem]) -> PaymentResult<i64> {
    items.iter().try_fold(0_i64, |total, item| {
        total
            .checked_add(item.total()?.amount)
            .ok_or_else(|| PaymentError::InvalidAmount {
                message: "order total overflows".to_string(),
            })
    })
}

/// Status of a ledger transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> PaymentResult<Self> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "success" => Ok(TransactionStatus::Success),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(PaymentError::Storage(format!(
                "unknown transaction status {:?}",
                other
            ))),
        }
    }
}

/// Append-only record of a confirmed provider payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub order_id: Uuid,
    pub payment_channel: PaymentType,
    pub external_transaction_id: String,
    pub amount: Price,
    pub status: TransactionStatus,
    /// Verbatim provider payload for audit
    pub raw_response: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
