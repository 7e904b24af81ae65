use chrono::{DateTime, Utc};
use opg_common::Amount;
use serde::{Deserialize, Serialize};

use crate::db_types::{Order, OrderStatusType, PaymentStatus};

/// Published after an order mutation has been committed, whichever path produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTransitionedEvent {
    pub order: Order,
    pub old_status: OrderStatusType,
    pub old_payment_status: PaymentStatus,
    pub actor_id: String,
    pub reason: Option<String>,
}

impl OrderTransitionedEvent {
    pub fn status_changed(&self) -> bool {
        self.old_status != self.order.status
    }
}

/// Published once per order, when a verified payment marks it as paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmedEvent {
    pub order: Order,
    pub reference: String,
}

/// Published whenever a verification claims the wrong amount for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountMismatchEvent {
    pub order_id: i64,
    pub reference: String,
    pub expected: Amount,
    pub claimed: Amount,
    pub currency: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    OrderTransitioned(OrderTransitionedEvent),
    PaymentConfirmed(PaymentConfirmedEvent),
    AmountMismatch(AmountMismatchEvent),
}
