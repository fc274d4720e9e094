//! # In-Memory Ledger
//!
//! One `tokio::sync::Mutex` guards orders and transactions together, so a
//! callback's read, plan and write happen under a single guard.

use async_trait::async_trait;
use chrono::Utc;
use pay_core::{
    log_plan, plan_settlement, CallbackResult, LedgerStore, Order, OrderNo, OrderStatus, Page,
    PageRequest, PaymentError, PaymentResult, SettlementReport, Transaction,
};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, instrument};
use uuid::Uuid;

#[derive(Debug, Default)]
struct LedgerState {
    orders: HashMap<Uuid, Order>,
    by_no: HashMap<OrderNo, Uuid>,
    transactions: Vec<Transaction>,
}

/// Process-local ledger for development and tests
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn create_order(&self, order: &Order) -> PaymentResult<()> {
        if order.items_total()? != order.total_amount {
            return Err(PaymentError::InvalidAmount {
                message: "order total does not match its items".to_string(),
            });
        }

        let mut state = self.state.lock().await;
        if state.by_no.contains_key(&order.order_no) || state.orders.contains_key(&order.id) {
            return Err(PaymentError::Storage(format!(
                "duplicate order {}",
                order.order_no
            )));
        }

        state.by_no.insert(order.order_no.clone(), order.id);
        state.orders.insert(order.id, order.clone());
        debug!(order_no = %order.order_no, "order stored");
        Ok(())
    }

    async fn find_order(&self, order_id: Uuid) -> PaymentResult<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&order_id).cloned())
    }

    async fn find_order_for_user(
        &self,
        order_id: Uuid,
        user_id: Uuid,
    ) -> PaymentResult<Option<Order>> {
        Ok(self
            .state
            .lock()
            .await
            .orders
            .get(&order_id)
            .filter(|o| o.user_id == user_id)
            .cloned())
    }

    async fn find_order_by_no(&self, order_no: &OrderNo) -> PaymentResult<Option<Order>> {
        let state = self.state.lock().await;
        Ok(state
            .by_no
            .get(order_no)
            .and_then(|id| state.orders.get(id))
            .cloned())
    }

    async fn list_orders_for_user(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> PaymentResult<Page<Order>> {
        let page = page.normalized();
        let state = self.state.lock().await;

        let mut orders: Vec<&Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = orders.len() as u64;
        let list = orders
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.page_size as usize)
            .cloned()
            .collect();

        Ok(Page {
            list,
            total,
            page: page.page,
            page_size: page.page_size,
        })
    }

    async fn has_paid_for_skill(&self, user_id: Uuid, skill_id: Uuid) -> PaymentResult<bool> {
        Ok(self.state.lock().await.orders.values().any(|o| {
            o.user_id == user_id && o.status == OrderStatus::Paid && o.contains_skill(skill_id)
        }))
    }

    #[instrument(skip(self, result), fields(order_no = %result.order_no, provider = %result.payment_type))]
    async fn apply_callback(&self, result: &CallbackResult) -> PaymentResult<SettlementReport> {
        let mut state = self.state.lock().await;

        let order_id = match state.by_no.get(&result.order_no) {
            Some(id) => *id,
            None => {
                error!("reconciliation alert: callback for unknown order");
                return Err(PaymentError::OrderNotFound {
                    reference: result.order_no.to_string(),
                });
            }
        };

        let existing: Vec<Transaction> = state
            .transactions
            .iter()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect();

        let LedgerState {
            orders,
            transactions,
            ..
        } = &mut *state;
        let order = orders
            .get_mut(&order_id)
            .ok_or_else(|| PaymentError::Internal("order index out of sync".to_string()))?;

        let plan = plan_settlement(order, &existing, result, Utc::now());
        log_plan(&plan, order, result.payment_type);

        plan.apply_to(order);
        if let Some(tx) = &plan.transaction {
            transactions.push(tx.clone());
        }

        Ok(SettlementReport::new(order, plan))
    }

    async fn transactions_for_order(&self, order_id: Uuid) -> PaymentResult<Vec<Transaction>> {
        Ok(self
            .state
            .lock()
            .await
            .transactions
            .iter()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pay_core::{
        Currency, NewOrderLine, PaymentType, Price, SettlementOutcome, TradeStatus,
    };
    use std::sync::Arc;

    fn order_for(user_id: Uuid, skill_id: Uuid) -> Order {
        Order::create(
            user_id,
            &[NewOrderLine {
                skill_id,
                price: Price::from_minor(9900, Currency::CNY),
                quantity: 1,
            }],
        )
        .unwrap()
    }

    fn callback(order: &Order, status: &str, trade_no: &str) -> CallbackResult {
        CallbackResult {
            external_trade_id: trade_no.to_string(),
            order_no: order.order_no.clone(),
            trade_status: TradeStatus::normalize(status),
            amount: Some(order.total_amount),
            raw_payload: serde_json::json!({"trade_status": status}),
            payment_type: PaymentType::Alipay,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicate_deliveries_settle_once() {
        let ledger = Arc::new(InMemoryLedger::new());
        let order = order_for(Uuid::new_v4(), Uuid::new_v4());
        ledger.create_order(&order).await.unwrap();

        let result = callback(&order, "TRADE_SUCCESS", "2024010122001400000000000001");
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let result = result.clone();
                tokio::spawn(async move { ledger.apply_callback(&result).await })
            })
            .collect();

        let mut settled = 0;
        for handle in handles {
            let report = handle.await.unwrap().unwrap();
            assert_eq!(report.status, OrderStatus::Paid);
            match report.outcome {
                SettlementOutcome::Settled => settled += 1,
                SettlementOutcome::AlreadySettled => {}
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert_eq!(settled, 1);

        let txs = ledger.transactions_for_order(order.id).await.unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].amount, order.total_amount);
    }

    #[tokio::test]
    async fn test_unknown_order_is_not_found_and_records_nothing() {
        let ledger = InMemoryLedger::new();
        let stray = order_for(Uuid::new_v4(), Uuid::new_v4());

        let err = ledger
            .apply_callback(&callback(&stray, "TRADE_SUCCESS", "T1"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::OrderNotFound { .. }));
        assert!(ledger.state.lock().await.transactions.is_empty());
    }

    #[tokio::test]
    async fn test_close_then_late_success_keeps_cancelled() {
        let ledger = InMemoryLedger::new();
        let order = order_for(Uuid::new_v4(), Uuid::new_v4());
        ledger.create_order(&order).await.unwrap();

        let closed = ledger
            .apply_callback(&callback(&order, "TRADE_CLOSED", "T1"))
            .await
            .unwrap();
        assert_eq!(closed.outcome, SettlementOutcome::Cancelled);

        let late = ledger
            .apply_callback(&callback(&order, "TRADE_SUCCESS", "T1"))
            .await
            .unwrap();
        assert_eq!(
            late.outcome,
            SettlementOutcome::PaymentOnClosedOrder {
                status: OrderStatus::Cancelled
            }
        );
        assert_eq!(late.status, OrderStatus::Cancelled);
        assert!(ledger.transactions_for_order(order.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_paid_order_marks_skill_purchased() {
        let ledger = InMemoryLedger::new();
        let user = Uuid::new_v4();
        let skill = Uuid::new_v4();
        let order = order_for(user, skill);
        ledger.create_order(&order).await.unwrap();

        assert!(!ledger.has_paid_for_skill(user, skill).await.unwrap());
        ledger
            .apply_callback(&callback(&order, "TRADE_SUCCESS", "T1"))
            .await
            .unwrap();
        assert!(ledger.has_paid_for_skill(user, skill).await.unwrap());
        assert!(!ledger.has_paid_for_skill(Uuid::new_v4(), skill).await.unwrap());

        let stored = ledger.find_order_by_no(&order.order_no).await.unwrap().unwrap();
        assert_eq!(stored.payment_method, Some(PaymentType::Alipay));
        assert!(stored.paid_at.is_some());
    }

    #[tokio::test]
    async fn test_listing_is_scoped_and_paged() {
        let ledger = InMemoryLedger::new();
        let user = Uuid::new_v4();
        for _ in 0..5 {
            ledger.create_order(&order_for(user, Uuid::new_v4())).await.unwrap();
        }
        ledger
            .create_order(&order_for(Uuid::new_v4(), Uuid::new_v4()))
            .await
            .unwrap();

        let first = ledger.list_orders_for_user(user, PageRequest::new(1, 2)).await.unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.list.len(), 2);
        assert!(first.list[0].created_at >= first.list[1].created_at);

        let last = ledger.list_orders_for_user(user, PageRequest::new(3, 2)).await.unwrap();
        assert_eq!(last.list.len(), 1);

        let other = ledger.find_order_for_user(first.list[0].id, Uuid::new_v4()).await.unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_order_no_rejected() {
        let ledger = InMemoryLedger::new();
        let order = order_for(Uuid::new_v4(), Uuid::new_v4());
        ledger.create_order(&order).await.unwrap();

        let mut copy = order.clone();
        copy.id = Uuid::new_v4();
        assert!(matches!(
            ledger.create_order(&copy).await,
            Err(PaymentError::Storage(_))
        ));
    }
}
