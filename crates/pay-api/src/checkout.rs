//! # Checkout and Callback Services
//!
//! Request-path orchestration between the skill directory, the ledger and the
//! gateway registry. Handlers stay thin and only translate HTTP.

use crate::factory::GatewayRegistry;
use pay_core::{
    CallbackAck, CallbackRequest, CheckoutArtifact, LedgerStore, NewOrderLine, Order, OrderNo,
    Page, PageRequest, PaymentError, PaymentGateway, PaymentResult, PaymentType,
    SettlementReport, SkillDirectory,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Checkout artifact plus the order it pays for
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentLink {
    pub artifact: CheckoutArtifact,
    pub order_id: Uuid,
    pub order_no: OrderNo,
    /// Adapter that produced the artifact
    pub provider: PaymentType,
}

pub struct CheckoutService {
    skills: Arc<dyn SkillDirectory>,
    ledger: Arc<dyn LedgerStore>,
    gateways: Arc<GatewayRegistry>,
}

impl CheckoutService {
    pub fn new(
        skills: Arc<dyn SkillDirectory>,
        ledger: Arc<dyn LedgerStore>,
        gateways: Arc<GatewayRegistry>,
    ) -> Self {
        Self {
            skills,
            ledger,
            gateways,
        }
    }

    /// Open a Pending order for one unit of a paid, active skill.
    #[instrument(skip(self), fields(user_id = %user_id, skill_id = %skill_id))]
    pub async fn create_order(&self, user_id: Uuid, skill_id: Uuid) -> PaymentResult<Order> {
        let skill = self
            .skills
            .find_skill(skill_id)
            .await?
            .filter(|s| s.is_active)
            .ok_or_else(|| PaymentError::SkillNotFound {
                skill_id: skill_id.to_string(),
            })?;

        if skill.is_free() {
            return Err(PaymentError::InvalidRequest(
                "Skill is free, no payment needed".to_string(),
            ));
        }

        if self.ledger.has_paid_for_skill(user_id, skill_id).await? {
            return Err(PaymentError::AlreadyPurchased {
                skill_id: skill_id.to_string(),
            });
        }

        let order = Order::create(
            user_id,
            &[NewOrderLine {
                skill_id,
                price: skill.price,
                quantity: 1,
            }],
        )?;
        self.ledger.create_order(&order).await?;

        info!(
            order_no = %order.order_no,
            amount = %order.total_amount.display(),
            "order created"
        );
        Ok(order)
    }

    pub async fn list_orders(&self, user_id: Uuid, page: PageRequest) -> PaymentResult<Page<Order>> {
        self.ledger.list_orders_for_user(user_id, page).await
    }

    /// Ask a gateway how the buyer pays for a Pending order.
    ///
    /// The order itself is not modified; a gateway failure leaves it Pending.
    #[instrument(skip(self), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn payment_artifact(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        provider: Option<PaymentType>,
    ) -> PaymentResult<PaymentLink> {
        let order = self
            .ledger
            .find_order_for_user(order_id, user_id)
            .await?
            .ok_or_else(|| PaymentError::OrderNotFound {
                reference: order_id.to_string(),
            })?;

        if !order.is_pending() {
            return Err(PaymentError::InvalidRequest(format!(
                "Order is {}, not payable",
                order.status
            )));
        }

        let gateway = match provider {
            Some(p) => self.gateways.get(p)?,
            None => self.gateways.default_gateway()?,
        };

        let subject = self.subject_for(&order).await;
        let artifact = gateway.create_payment(&order, &subject).await?;

        Ok(PaymentLink {
            artifact,
            order_id: order.id,
            order_no: order.order_no,
            provider: gateway.payment_type(),
        })
    }

    async fn subject_for(&self, order: &Order) -> String {
        let fallback = || format!("Skill Order #{}", order.order_no);
        let Some(item) = order.items.first() else {
            return fallback();
        };

        match self.skills.find_skill(item.skill_id).await {
            Ok(Some(skill)) if !skill.name.trim().is_empty() => skill.name,
            Ok(_) => fallback(),
            Err(e) => {
                warn!(error = %e, "skill lookup failed, using generic subject");
                fallback()
            }
        }
    }
}

/// What the callback endpoint sends back and what the ledger did
#[derive(Debug, Clone)]
pub struct CallbackReceipt {
    pub ack: CallbackAck,
    /// `None` when the event was acknowledged without touching the ledger
    pub report: Option<SettlementReport>,
}

pub struct CallbackService {
    ledger: Arc<dyn LedgerStore>,
    gateways: Arc<GatewayRegistry>,
}

impl CallbackService {
    pub fn new(ledger: Arc<dyn LedgerStore>, gateways: Arc<GatewayRegistry>) -> Self {
        Self { ledger, gateways }
    }

    /// verify → process → apply, for one provider delivery
    #[instrument(skip(self, request), fields(provider = %provider, bytes = request.body.len()))]
    pub async fn handle(
        &self,
        provider: PaymentType,
        request: &CallbackRequest,
    ) -> PaymentResult<CallbackReceipt> {
        let gateway = self.gateways.get(provider)?;

        if let Err(e) = gateway.verify_callback(request).await {
            warn!(error = %e, "callback rejected");
            return Err(e);
        }

        let result = match gateway.process_callback(request).await {
            Ok(result) => result,
            Err(PaymentError::UnsupportedEvent { event_type, .. }) => {
                info!(event_type = %event_type, "event not consumed, acknowledging");
                return Ok(CallbackReceipt {
                    ack: gateway.acknowledgment(),
                    report: None,
                });
            }
            Err(e) => {
                warn!(error = %e, "callback payload rejected");
                return Err(e);
            }
        };

        let report = self.ledger.apply_callback(&result).await?;

        Ok(CallbackReceipt {
            ack: gateway.acknowledgment(),
            report: Some(report),
        })
    }
}
