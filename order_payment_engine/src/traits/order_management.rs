use chrono::{DateTime, Utc};

use crate::{
    db_types::{NewOrder, Order, StatusHistoryEntry},
    traits::{
        data_objects::{MutationResult, OrderMutation},
        PaymentGatewayError,
    },
};

#[allow(async_fn_in_trait)]
pub trait OrderManagement {
    /// Stores a new order with `pending` status. This call is idempotent on the order number.
    /// Returns true if the order was inserted, or false if it already existed.
    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), PaymentGatewayError>;

    async fn fetch_order(&self, order_id: i64) -> Result<Option<Order>, PaymentGatewayError>;

    async fn fetch_order_by_number(&self, order_number: &str) -> Result<Option<Order>, PaymentGatewayError>;

    async fn fetch_order_by_reference(&self, reference: &str) -> Result<Option<Order>, PaymentGatewayError>;

    /// Sets the payment reference of an order that does not have one yet.
    ///
    /// Fails with `Transient` if the version moved on, and with `Conflict` if the order already has a reference or
    /// another order already uses this one.
    async fn assign_payment_reference(
        &self,
        order_id: i64,
        expected_version: i64,
        reference: &str,
    ) -> Result<Order, PaymentGatewayError>;

    /// Applies the mutation atomically. See [`OrderMutation`] for the full contract.
    ///
    /// ## Failure modes:
    /// - `OrderNotFound` if the order does not exist.
    /// - `Transient` if the stored version differs from `expected_version`.
    /// - `DuplicateAction` if the mutation carries a dedupe key that has already been used.
    async fn apply_order_mutation(&self, mutation: OrderMutation) -> Result<MutationResult, PaymentGatewayError>;

    /// Oldest first.
    async fn fetch_status_history(&self, order_id: i64) -> Result<Vec<StatusHistoryEntry>, PaymentGatewayError>;

    /// History rows whose notifications have not been enqueued and that were written before `cutoff`.
    async fn fetch_unnotified_history(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StatusHistoryEntry>, PaymentGatewayError>;

    async fn mark_history_notified(&self, history_id: i64) -> Result<(), PaymentGatewayError>;

    /// Orders whose payment status is `paid` while their status is still `pending`.
    async fn fetch_paid_orders_awaiting_confirmation(&self) -> Result<Vec<Order>, PaymentGatewayError>;

    /// Orders whose payment status is `paid` but that have no completed payment transaction.
    async fn fetch_paid_orders_without_transaction(&self) -> Result<Vec<Order>, PaymentGatewayError>;

    /// Orders whose payment status is `pending` even though a completed payment transaction exists for them.
    async fn fetch_unpaid_orders_with_completed_transaction(&self) -> Result<Vec<Order>, PaymentGatewayError>;
}
