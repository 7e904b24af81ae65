//! `SqliteDatabase` is a concrete implementation of a payment engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`crate::traits`]
//! module. Multi-statement changes run inside a single `pool.begin()` transaction whose first statement is a write,
//! so the write lock is taken up front rather than upgraded from a read lock.
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqlitePool;

use super::db::{
    db_url,
    dedupe,
    history,
    incidents,
    new_pool,
    notifications,
    orders,
    rate_limits,
    suppressions,
    transactions,
};
use crate::{
    db_types::{
        DedupeRecord,
        NewNotificationAudit,
        NewNotificationEvent,
        NewOrder,
        NewPaymentTransaction,
        NewSecurityIncident,
        NotificationAuditEntry,
        NotificationEvent,
        NotificationStatus,
        Order,
        PaymentTransaction,
        SecurityIncident,
        StatusHistoryEntry,
        SuppressionEntry,
        SuppressionReason,
    },
    helpers::{DedupeKey, OrderLocks},
    traits::{
        DedupOutcome,
        InsertOutcome,
        MutationResult,
        NotificationManagement,
        OrderManagement,
        OrderMutation,
        PaymentGatewayDatabase,
        PaymentGatewayError,
        PaymentManagement,
        SuppressionManagement,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
    locks: OrderLocks,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl PaymentGatewayDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    fn order_locks(&self) -> &OrderLocks {
        &self.locks
    }

    async fn close(&mut self) -> Result<(), PaymentGatewayError> {
        self.pool.close().await;
        Ok(())
    }
}

impl OrderManagement for SqliteDatabase {
    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        orders::idempotent_insert(order, &mut conn).await
    }

    async fn fetch_order(&self, order_id: i64) -> Result<Option<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_order(order_id, &mut conn).await?)
    }

    async fn fetch_order_by_number(&self, order_number: &str) -> Result<Option<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_order_by_number(order_number, &mut conn).await?)
    }

    async fn fetch_order_by_reference(&self, reference: &str) -> Result<Option<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_order_by_reference(reference, &mut conn).await?)
    }

    async fn assign_payment_reference(
        &self,
        order_id: i64,
        expected_version: i64,
        reference: &str,
    ) -> Result<Order, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        if let Some(order) =
            orders::set_payment_reference(order_id, expected_version, reference, Utc::now(), &mut conn).await?
        {
            debug!("🗃️ Order #{order_id} now has payment reference {reference}");
            return Ok(order);
        }
        match orders::fetch_order(order_id, &mut conn).await? {
            None => Err(PaymentGatewayError::OrderNotFound(order_id.to_string())),
            Some(o) if o.payment_reference.is_some() => {
                Err(PaymentGatewayError::Conflict(format!("Order #{order_id} already has a payment reference")))
            },
            Some(o) => Err(PaymentGatewayError::Transient(format!(
                "Order #{order_id} changed concurrently (expected version {expected_version}, found {})",
                o.version
            ))),
        }
    }

    async fn apply_order_mutation(&self, mutation: OrderMutation) -> Result<MutationResult, PaymentGatewayError> {
        let now = Utc::now();
        let order_id = mutation.order_id;
        let mut tx = self.pool.begin().await?;
        if let Some(key) = &mutation.dedupe_key {
            if dedupe::try_insert(key, now, &mut tx).await? == DedupOutcome::AlreadyExists {
                debug!("🗃️ Mutation of order #{order_id} skipped. Dedupe key {key} is already taken");
                return Err(PaymentGatewayError::DuplicateAction(key.to_string()));
            }
        }
        let Some(order) = orders::update_state(&mutation, now, &mut tx).await? else {
            let current = orders::fetch_order(order_id, &mut tx).await?;
            return Err(match current {
                None => PaymentGatewayError::OrderNotFound(order_id.to_string()),
                Some(o) => PaymentGatewayError::Transient(format!(
                    "Order #{order_id} changed concurrently (expected version {}, found {})",
                    mutation.expected_version, o.version
                )),
            });
        };
        if let Some(txn_id) = mutation.complete_transaction {
            let txn = transactions::mark_completed(txn_id, now, &mut tx).await?;
            trace!("🗃️ Payment transaction {} completed for order #{order_id}", txn.reference);
        }
        let history = history::insert_entry(&mutation, order.version, now, &mut tx).await?;
        tx.commit().await?;
        debug!(
            "🗃️ Order #{order_id} is now {}/{} at version {} (by {})",
            order.status, order.payment_status, order.version, mutation.actor_id
        );
        Ok(MutationResult { order, history })
    }

    async fn fetch_status_history(&self, order_id: i64) -> Result<Vec<StatusHistoryEntry>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(history::fetch_for_order(order_id, &mut conn).await?)
    }

    async fn fetch_unnotified_history(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StatusHistoryEntry>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(history::fetch_unnotified(cutoff, &mut conn).await?)
    }

    async fn mark_history_notified(&self, history_id: i64) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(history::mark_notified(history_id, &mut conn).await?)
    }

    async fn fetch_paid_orders_awaiting_confirmation(&self) -> Result<Vec<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::paid_orders_awaiting_confirmation(&mut conn).await?)
    }

    async fn fetch_paid_orders_without_transaction(&self) -> Result<Vec<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::paid_orders_without_transaction(&mut conn).await?)
    }

    async fn fetch_unpaid_orders_with_completed_transaction(&self) -> Result<Vec<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::unpaid_orders_with_completed_transaction(&mut conn).await?)
    }
}

impl PaymentManagement for SqliteDatabase {
    async fn upsert_transaction(&self, txn: NewPaymentTransaction) -> Result<PaymentTransaction, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let txn = transactions::upsert(txn, Utc::now(), &mut conn).await?;
        trace!("🗃️ Transaction {} has seen {} verification attempts", txn.reference, txn.verification_attempts);
        Ok(txn)
    }

    async fn backfill_transaction(
        &self,
        txn: NewPaymentTransaction,
    ) -> Result<Option<PaymentTransaction>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        transactions::insert_backfilled(txn, Utc::now(), &mut conn).await
    }

    async fn fetch_transaction(&self, reference: &str) -> Result<Option<PaymentTransaction>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(transactions::fetch_by_reference(reference, &mut conn).await?)
    }

    async fn fetch_transactions_for_order(
        &self,
        order_id: i64,
    ) -> Result<Vec<PaymentTransaction>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(transactions::fetch_for_order(order_id, &mut conn).await?)
    }

    async fn fetch_completed_transaction(
        &self,
        order_id: i64,
    ) -> Result<Option<PaymentTransaction>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(transactions::fetch_completed_for_order(order_id, &mut conn).await?)
    }

    async fn insert_incident(&self, incident: NewSecurityIncident) -> Result<SecurityIncident, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(incidents::insert(incident, Utc::now(), &mut conn).await?)
    }

    async fn fetch_incidents_for_order(&self, order_id: i64) -> Result<Vec<SecurityIncident>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(incidents::fetch_for_order(order_id, &mut conn).await?)
    }

    async fn try_insert_dedupe_key(&self, key: &DedupeKey) -> Result<DedupOutcome, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(dedupe::try_insert(key, Utc::now(), &mut conn).await?)
    }

    async fn fetch_dedupe_record(&self, key: &str) -> Result<Option<DedupeRecord>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(dedupe::fetch(key, &mut conn).await?)
    }
}

impl NotificationManagement for SqliteDatabase {
    async fn insert_notification(
        &self,
        event: NewNotificationEvent,
    ) -> Result<InsertOutcome<NotificationEvent>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        // The live holder of the key can fail between our insert and our read. One more round settles it.
        for _ in 0..2 {
            if let Some(created) = notifications::insert_if_absent(&event, Utc::now(), &mut conn).await? {
                return Ok(InsertOutcome::Created(created));
            }
            if let Some(existing) = notifications::fetch_live_by_key(&event.dedupe_key, &mut conn).await? {
                return Ok(InsertOutcome::Existing(existing));
            }
        }
        Err(PaymentGatewayError::Transient(format!("Dedupe key {} is changing hands", event.dedupe_key)))
    }

    async fn fetch_notification(&self, id: i64) -> Result<Option<NotificationEvent>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(notifications::fetch(id, &mut conn).await?)
    }

    async fn fetch_notifications_for_order(
        &self,
        order_id: i64,
    ) -> Result<Vec<NotificationEvent>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(notifications::fetch_for_order(order_id, &mut conn).await?)
    }

    async fn claim_due_notifications(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<NotificationEvent>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(notifications::claim_due(now, limit, &mut conn).await?)
    }

    async fn mark_notification_sent(&self, id: i64) -> Result<NotificationEvent, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        notifications::mark_sent(id, Utc::now(), &mut conn).await
    }

    async fn record_delivery_failure(
        &self,
        id: i64,
        error: &str,
        max_retries: i64,
        retry_at: DateTime<Utc>,
    ) -> Result<NotificationEvent, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        notifications::record_failure(id, error, max_retries, retry_at, Utc::now(), &mut conn).await
    }

    async fn defer_notification(
        &self,
        id: i64,
        until: DateTime<Utc>,
    ) -> Result<NotificationEvent, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        notifications::defer(id, until, Utc::now(), &mut conn).await
    }

    async fn fail_notification(&self, id: i64, reason: &str) -> Result<NotificationEvent, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        notifications::fail(id, reason, Utc::now(), &mut conn).await
    }

    async fn fail_stale_notifications(
        &self,
        status: NotificationStatus,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<NotificationEvent>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        notifications::fail_stale(status, cutoff, reason, Utc::now(), &mut conn).await
    }

    async fn dead_letter_failed(&self, cutoff: DateTime<Utc>) -> Result<Vec<NotificationEvent>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(notifications::dead_letter(cutoff, Utc::now(), &mut conn).await?)
    }

    async fn requeue_notification(&self, id: i64) -> Result<NotificationEvent, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        notifications::requeue(id, Utc::now(), &mut conn).await
    }

    async fn record_notification_audit(
        &self,
        entry: NewNotificationAudit,
    ) -> Result<NotificationAuditEntry, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(notifications::insert_audit(entry, Utc::now(), &mut conn).await?)
    }

    async fn fetch_notification_audit(
        &self,
        order_id: i64,
    ) -> Result<Vec<NotificationAuditEntry>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(notifications::fetch_audit_for_order(order_id, &mut conn).await?)
    }
}

impl SuppressionManagement for SqliteDatabase {
    async fn upsert_suppression(
        &self,
        recipient: &str,
        reason: SuppressionReason,
    ) -> Result<SuppressionEntry, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(suppressions::upsert(recipient, reason, Utc::now(), &mut conn).await?)
    }

    async fn reactivate_suppression(
        &self,
        recipient: &str,
        actor_id: &str,
    ) -> Result<Option<SuppressionEntry>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(suppressions::reactivate(recipient, actor_id, Utc::now(), &mut conn).await?)
    }

    async fn fetch_active_suppressions(
        &self,
        candidates: &[String],
    ) -> Result<Vec<SuppressionEntry>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(suppressions::fetch_active(candidates, &mut conn).await?)
    }

    async fn increment_rate_window(
        &self,
        identifier: &str,
        window_start: DateTime<Utc>,
    ) -> Result<i64, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(rate_limits::increment(identifier, window_start, &mut conn).await?)
    }

    async fn purge_rate_windows(&self, cutoff: DateTime<Utc>) -> Result<u64, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(rate_limits::purge_before(cutoff, &mut conn).await?)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object, reading the URL from `OPG_DATABASE_URL`.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool, locks: OrderLocks::new() })
    }

    /// Brings the schema up to date. Safe to call on every start.
    pub async fn migrate(&self) -> Result<(), PaymentGatewayError> {
        sqlx::migrate!("./src/sqlite/migrations").run(&self.pool).await?;
        info!("🗃️ Database migrations are up to date");
        Ok(())
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
