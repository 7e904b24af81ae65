use std::fmt::Debug;

use log::*;

use crate::{
    db_types::{NewOrder, Order, OrderStatusType, PaymentStatus},
    events::{EventProducers, OrderTransitionedEvent, PaymentConfirmedEvent},
    helpers::{with_retries, DedupeKey, OrderLockGuard, OrderLocks},
    opg_api::{
        auth_context::{AuthContext, Role},
        engine_config::EngineConfig,
        notification_api::NotificationQueue,
        order_objects::{OrderDetails, TransitionMode},
    },
    traits::{MutationResult, OrderMutation, PaymentGatewayDatabase, PaymentGatewayError},
};

/// `OrderFlowApi` owns every change to an order's status.
///
/// All changes follow the same path: take the order's lock, read the current state, validate, apply one atomic
/// mutation (version check, version bump, history row), release the lock, then run the post-commit hook. The hook
/// enqueues notifications and publishes events. It never fails the transition; anything it cannot do is left in the
/// history outbox for the reconciliation sweeper.
pub struct OrderFlowApi<B> {
    db: B,
    locks: OrderLocks,
    notifications: NotificationQueue<B>,
    producers: EventProducers,
    config: EngineConfig,
}

impl<B: Clone> Clone for OrderFlowApi<B> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            locks: self.locks.clone(),
            notifications: self.notifications.clone(),
            producers: self.producers.clone(),
            config: self.config.clone(),
        }
    }
}

impl<B> Debug for OrderFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderFlowApi")
    }
}

impl<B: PaymentGatewayDatabase> OrderFlowApi<B> {
    /// The order locks come from the backend, so every `OrderFlowApi` built on clones of the same database handle
    /// serialises on the same per-order locks.
    pub fn new(db: B, producers: EventProducers, config: EngineConfig) -> Self {
        let notifications = NotificationQueue::new(db.clone(), config.clone());
        let locks = db.order_locks().clone();
        Self { db, locks, notifications, producers, config }
    }
}

impl<B> OrderFlowApi<B> {
    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn locks(&self) -> &OrderLocks {
        &self.locks
    }

    pub fn notifications(&self) -> &NotificationQueue<B> {
        &self.notifications
    }

    pub fn producers(&self) -> &EventProducers {
        &self.producers
    }
}

impl<B> OrderFlowApi<B>
where B: PaymentGatewayDatabase
{
    /// Stores a new order from checkout. Idempotent on the order number.
    pub async fn process_new_order(&self, order: NewOrder) -> Result<Order, PaymentGatewayError> {
        if order.order_number.trim().is_empty() {
            return Err(PaymentGatewayError::ValidationError("An order number is required".into()));
        }
        if order.total_amount.is_negative() || order.delivery_fee.is_negative() {
            return Err(PaymentGatewayError::ValidationError("Order amounts cannot be negative".into()));
        }
        if order.total_amount.checked_add(order.delivery_fee).is_none() {
            return Err(PaymentGatewayError::ValidationError("The order total and delivery fee are too large".into()));
        }
        let (order, inserted) = self.db.insert_order(order).await?;
        if inserted {
            debug!("🔄️📦️ Order [{}] created with id #{}", order.order_number, order.id);
        } else {
            debug!("🔄️📦️ Order [{}] already exists as #{}", order.order_number, order.id);
        }
        Ok(order)
    }

    pub async fn fetch_order(&self, order_id: i64) -> Result<Order, PaymentGatewayError> {
        self.db.fetch_order(order_id).await?.ok_or_else(|| PaymentGatewayError::OrderNotFound(order_id.to_string()))
    }

    pub async fn order_details(&self, order_id: i64) -> Result<OrderDetails, PaymentGatewayError> {
        let order = self.fetch_order(order_id).await?;
        let history = self.db.fetch_status_history(order_id).await?;
        let transactions = self.db.fetch_transactions_for_order(order_id).await?;
        let incidents = self.db.fetch_incidents_for_order(order_id).await?;
        let notifications = self.db.fetch_notifications_for_order(order_id).await?;
        Ok(OrderDetails { order, history, transactions, incidents, notifications })
    }

    /// The transition entry point.
    ///
    /// Moving to the current status is a no-op that returns the order unchanged. Forward moves along the fulfilment
    /// chain and moves to a side branch from any non-terminal status are allowed. Anything else fails with
    /// `InvalidTransition`. Moving a paid order to `refunded` also marks its payment refunded.
    pub async fn transition(
        &self,
        order_id: i64,
        target: OrderStatusType,
        auth: &AuthContext,
    ) -> Result<Order, PaymentGatewayError> {
        auth.require_any(&[Role::Admin, Role::System])?;
        let label = format!("Transition of order #{order_id} to {target}");
        with_retries(&label, self.config.retry_attempts, self.config.retry_backoff, || {
            self.transition_once(order_id, target, TransitionMode::Regular, &auth.actor_id, None)
        })
        .await
    }

    /// The correction path. Admins may move an order to any status, backwards included, but must say why.
    pub async fn correct_status(
        &self,
        order_id: i64,
        target: OrderStatusType,
        reason: &str,
        auth: &AuthContext,
    ) -> Result<Order, PaymentGatewayError> {
        auth.require_any(&[Role::Admin])?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(PaymentGatewayError::ValidationError("A correction needs a reason".into()));
        }
        let label = format!("Correction of order #{order_id} to {target}");
        with_retries(&label, self.config.retry_attempts, self.config.retry_backoff, || {
            self.transition_once(order_id, target, TransitionMode::Correction, &auth.actor_id, Some(reason))
        })
        .await
    }

    /// Used by internal flows (the sweeper) that must go through the state machine with their own reason.
    pub(crate) async fn system_transition(
        &self,
        order_id: i64,
        target: OrderStatusType,
        reason: &str,
    ) -> Result<Order, PaymentGatewayError> {
        let label = format!("System transition of order #{order_id} to {target}");
        with_retries(&label, self.config.retry_attempts, self.config.retry_backoff, || {
            self.transition_once(order_id, target, TransitionMode::Regular, "system", Some(reason))
        })
        .await
    }

    /// Marks an order paid on the strength of a transaction that is already `completed`, confirming it if it is still
    /// pending. Returns `None` if the order is paid by now or this payment has been applied before.
    pub(crate) async fn confirm_recorded_payment(
        &self,
        order_id: i64,
        reference: &str,
        reason: &str,
    ) -> Result<Option<Order>, PaymentGatewayError> {
        let label = format!("Recovery of payment {reference} for order #{order_id}");
        with_retries(&label, self.config.retry_attempts, self.config.retry_backoff, || async {
            let guard = self.lock_order(order_id).await?;
            let order = self.fetch_order(order_id).await?;
            if order.is_paid() {
                return Ok(None);
            }
            let target = match order.status {
                OrderStatusType::Pending => OrderStatusType::Confirmed,
                current => current,
            };
            let mutation = OrderMutation::new(&order, target, PaymentStatus::Paid, "system")
                .with_reason(Some(reason))
                .guarded_by(DedupeKey::for_payment_confirmation(order_id, reference));
            let result = match self.db.apply_order_mutation(mutation).await {
                Ok(result) => result,
                Err(PaymentGatewayError::DuplicateAction(key)) => {
                    warn!("🔄️ Payment {reference} for order #{order_id} was applied before ({key}). Leaving it alone.");
                    return Ok(None);
                },
                Err(e) => return Err(e),
            };
            drop(guard);
            self.after_commit(&result).await;
            Ok(Some(result.order))
        })
        .await
    }

    async fn transition_once(
        &self,
        order_id: i64,
        target: OrderStatusType,
        mode: TransitionMode,
        actor_id: &str,
        reason: Option<&str>,
    ) -> Result<Order, PaymentGatewayError> {
        let guard = self.lock_order(order_id).await?;
        let order = self.fetch_order(order_id).await?;
        if order.status == target {
            trace!("🔄️ Order #{order_id} is already {target}. Nothing to do.");
            return Ok(order);
        }
        if mode == TransitionMode::Regular && !order.status.can_transition_to(target) {
            warn!("🔄️ {actor_id} tried to move order #{order_id} from {} to {target}. Rejected.", order.status);
            return Err(PaymentGatewayError::InvalidTransition { from: order.status, to: target });
        }
        let payment_status = match (target, order.payment_status) {
            (OrderStatusType::Refunded, PaymentStatus::Paid) => PaymentStatus::Refunded,
            (_, current) => current,
        };
        let mutation = OrderMutation::new(&order, target, payment_status, actor_id).with_reason(reason);
        let result = self.db.apply_order_mutation(mutation).await?;
        drop(guard);
        info!("🔄️ Order #{order_id} moved from {} to {target} by {actor_id}", order.status);
        self.after_commit(&result).await;
        Ok(result.order)
    }

    pub(crate) async fn lock_order(&self, order_id: i64) -> Result<OrderLockGuard, PaymentGatewayError> {
        self.locks.acquire(order_id, self.config.lock_timeout).await
    }

    /// The post-commit hook. Runs after the lock has been released and never fails the caller.
    pub(crate) async fn after_commit(&self, result: &MutationResult) {
        let MutationResult { order, history } = result;
        match self.notifications.enqueue_for_history(order, history).await {
            Ok(_) => {
                if let Err(e) = self.db.mark_history_notified(history.id).await {
                    warn!("🔄️ Notifications for history #{} are queued, but the outbox flag was not set: {e}", history.id);
                }
            },
            Err(e) => {
                warn!("🔄️ Could not queue notifications for order #{}: {e}. The sweeper will retry.", order.id);
                self.notifications.record_enqueue_failure(order, &e).await;
            },
        }
        let event = OrderTransitionedEvent {
            order: order.clone(),
            old_status: history.old_status,
            old_payment_status: history.old_payment_status,
            actor_id: history.actor_id.clone(),
            reason: history.reason.clone(),
        };
        self.producers.publish_order_transitioned(event).await;
        if history.became_paid() {
            let reference = order.payment_reference.clone().unwrap_or_default();
            self.producers.publish_payment_confirmed(PaymentConfirmedEvent { order: order.clone(), reference }).await;
        }
    }
}
