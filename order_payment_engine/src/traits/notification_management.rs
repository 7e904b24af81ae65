use chrono::{DateTime, Utc};

use crate::{
    db_types::{
        NewNotificationAudit,
        NewNotificationEvent,
        NotificationAuditEntry,
        NotificationEvent,
        NotificationStatus,
    },
    traits::{data_objects::InsertOutcome, PaymentGatewayError},
};

/// The durable notification queue.
///
/// At most one event per dedupe key may be `queued`, `processing` or `sent` at any time. `failed` and `dead` events
/// release their key.
#[allow(async_fn_in_trait)]
pub trait NotificationManagement {
    /// Inserts the event, or returns the live event that already holds its dedupe key.
    async fn insert_notification(
        &self,
        event: NewNotificationEvent,
    ) -> Result<InsertOutcome<NotificationEvent>, PaymentGatewayError>;

    async fn fetch_notification(&self, id: i64) -> Result<Option<NotificationEvent>, PaymentGatewayError>;

    async fn fetch_notifications_for_order(&self, order_id: i64)
        -> Result<Vec<NotificationEvent>, PaymentGatewayError>;

    /// Moves up to `limit` due events from `queued` to `processing`, oldest schedule first, and returns them.
    /// Concurrent callers never receive the same event.
    async fn claim_due_notifications(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<NotificationEvent>, PaymentGatewayError>;

    async fn mark_notification_sent(&self, id: i64) -> Result<NotificationEvent, PaymentGatewayError>;

    /// Counts a failed delivery attempt. The event goes back to `queued` at `retry_at`, or to `failed` once
    /// `max_retries` attempts have failed.
    async fn record_delivery_failure(
        &self,
        id: i64,
        error: &str,
        max_retries: i64,
        retry_at: DateTime<Utc>,
    ) -> Result<NotificationEvent, PaymentGatewayError>;

    /// Puts a claimed event back in the queue without counting an attempt.
    async fn defer_notification(
        &self,
        id: i64,
        until: DateTime<Utc>,
    ) -> Result<NotificationEvent, PaymentGatewayError>;

    /// Fails an event outright, e.g. because its recipient was suppressed after it was queued.
    async fn fail_notification(&self, id: i64, reason: &str) -> Result<NotificationEvent, PaymentGatewayError>;

    /// Fails every event that has sat in `status` since before `cutoff`.
    async fn fail_stale_notifications(
        &self,
        status: NotificationStatus,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<NotificationEvent>, PaymentGatewayError>;

    /// Moves events that failed before `cutoff` to `dead`.
    async fn dead_letter_failed(&self, cutoff: DateTime<Utc>) -> Result<Vec<NotificationEvent>, PaymentGatewayError>;

    /// Puts a `failed` or `dead` event back in the queue with a fresh retry budget.
    /// Fails with `Conflict` if another live event already holds the same dedupe key.
    async fn requeue_notification(&self, id: i64) -> Result<NotificationEvent, PaymentGatewayError>;

    async fn record_notification_audit(
        &self,
        entry: NewNotificationAudit,
    ) -> Result<NotificationAuditEntry, PaymentGatewayError>;

    async fn fetch_notification_audit(&self, order_id: i64)
        -> Result<Vec<NotificationAuditEntry>, PaymentGatewayError>;
}
