use serde::{Deserialize, Serialize};

use crate::{
    db_types::{Order, OrderStatusType, PaymentStatus, StatusHistoryEntry},
    helpers::DedupeKey,
};

/// A single, atomic change to an order.
///
/// Backends apply it only if the stored version still equals `expected_version`. In the same database transaction
/// they bump the version, write a status history row, optionally mark a payment transaction completed, and
/// optionally claim a dedupe key. If the key is already taken, nothing is written.
#[derive(Debug, Clone)]
pub struct OrderMutation {
    pub order_id: i64,
    pub expected_version: i64,
    pub old_status: OrderStatusType,
    pub new_status: OrderStatusType,
    pub old_payment_status: PaymentStatus,
    pub new_payment_status: PaymentStatus,
    pub actor_id: String,
    pub reason: Option<String>,
    pub complete_transaction: Option<i64>,
    pub dedupe_key: Option<DedupeKey>,
}

impl OrderMutation {
    pub fn new(order: &Order, new_status: OrderStatusType, new_payment_status: PaymentStatus, actor_id: &str) -> Self {
        Self {
            order_id: order.id,
            expected_version: order.version,
            old_status: order.status,
            new_status,
            old_payment_status: order.payment_status,
            new_payment_status,
            actor_id: actor_id.to_string(),
            reason: None,
            complete_transaction: None,
            dedupe_key: None,
        }
    }

    pub fn with_reason<S: Into<String>>(mut self, reason: Option<S>) -> Self {
        self.reason = reason.map(Into::into);
        self
    }

    pub fn completing_transaction(mut self, transaction_id: i64) -> Self {
        self.complete_transaction = Some(transaction_id);
        self
    }

    pub fn guarded_by(mut self, key: DedupeKey) -> Self {
        self.dedupe_key = Some(key);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationResult {
    pub order: Order,
    pub history: StatusHistoryEntry,
}

/// Result of an insert-or-get on a row guarded by a uniqueness constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome<T> {
    Created(T),
    Existing(T),
}

impl<T> InsertOutcome<T> {
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Self::Created(v) | Self::Existing(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupOutcome {
    Inserted,
    AlreadyExists,
}
