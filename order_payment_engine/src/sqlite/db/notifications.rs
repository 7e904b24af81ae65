use chrono::{DateTime, Utc};
use sqlx::{types::Json, SqliteConnection};

use crate::{
    db_types::{NewNotificationAudit, NewNotificationEvent, NotificationAuditEntry, NotificationEvent, NotificationStatus},
    traits::PaymentGatewayError,
};

/// Inserts the event unless a live event already holds its dedupe key, in which case `None` is returned and nothing
/// is written.
pub async fn insert_if_absent(
    event: &NewNotificationEvent,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<NotificationEvent>, sqlx::Error> {
    sqlx::query_as(
        r#"
            INSERT INTO notification_events (
                order_id,
                event_type,
                recipient,
                template_key,
                variables,
                dedupe_key,
                scheduled_at,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            ON CONFLICT DO NOTHING
            RETURNING *;
        "#,
    )
    .bind(event.order_id)
    .bind(&event.event_type)
    .bind(&event.recipient)
    .bind(&event.template_key)
    .bind(Json(&event.variables))
    .bind(&event.dedupe_key)
    .bind(event.scheduled_at)
    .bind(now)
    .fetch_optional(conn)
    .await
}

/// The event currently holding the dedupe key, if any.
pub async fn fetch_live_by_key(
    dedupe_key: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<NotificationEvent>, sqlx::Error> {
    sqlx::query_as(
        r#"
            SELECT * FROM notification_events
            WHERE dedupe_key = $1 AND status IN ('queued', 'processing', 'sent')
            LIMIT 1;
        "#,
    )
    .bind(dedupe_key)
    .fetch_optional(conn)
    .await
}

pub async fn fetch(id: i64, conn: &mut SqliteConnection) -> Result<Option<NotificationEvent>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM notification_events WHERE id = $1").bind(id).fetch_optional(conn).await
}

pub async fn fetch_for_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<NotificationEvent>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM notification_events WHERE order_id = $1 ORDER BY id")
        .bind(order_id)
        .fetch_all(conn)
        .await
}

/// A single statement, so two dispatchers can never claim the same event.
pub async fn claim_due(
    now: DateTime<Utc>,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<NotificationEvent>, sqlx::Error> {
    let mut events: Vec<NotificationEvent> = sqlx::query_as(
        r#"
            UPDATE notification_events SET status = 'processing', updated_at = $1
            WHERE id IN (
                SELECT id FROM notification_events
                WHERE status = 'queued' AND scheduled_at <= $1
                ORDER BY scheduled_at, id
                LIMIT $2
            )
            RETURNING *;
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    // RETURNING gives no ordering guarantee
    events.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then(a.id.cmp(&b.id)));
    Ok(events)
}

pub async fn mark_sent(
    id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<NotificationEvent, PaymentGatewayError> {
    sqlx::query_as(
        r#"
            UPDATE notification_events SET status = 'sent', sent_at = $1, last_error = NULL, updated_at = $1
            WHERE id = $2 AND status = 'processing'
            RETURNING *;
        "#,
    )
    .bind(now)
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| not_processing(id))
}

pub async fn record_failure(
    id: i64,
    error: &str,
    max_retries: i64,
    retry_at: DateTime<Utc>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<NotificationEvent, PaymentGatewayError> {
    // Right-hand sides see the row as it was before the update.
    sqlx::query_as(
        r#"
            UPDATE notification_events SET
                retry_count = retry_count + 1,
                status = CASE WHEN retry_count + 1 >= $1 THEN 'failed' ELSE 'queued' END,
                scheduled_at = CASE WHEN retry_count + 1 >= $1 THEN scheduled_at ELSE $2 END,
                last_error = $3,
                updated_at = $4
            WHERE id = $5 AND status = 'processing'
            RETURNING *;
        "#,
    )
    .bind(max_retries)
    .bind(retry_at)
    .bind(error)
    .bind(now)
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| not_processing(id))
}

pub async fn defer(
    id: i64,
    until: DateTime<Utc>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<NotificationEvent, PaymentGatewayError> {
    sqlx::query_as(
        r#"
            UPDATE notification_events SET status = 'queued', scheduled_at = $1, updated_at = $2
            WHERE id = $3 AND status = 'processing'
            RETURNING *;
        "#,
    )
    .bind(until)
    .bind(now)
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| not_processing(id))
}

pub async fn fail(
    id: i64,
    reason: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<NotificationEvent, PaymentGatewayError> {
    sqlx::query_as(
        r#"
            UPDATE notification_events SET status = 'failed', last_error = $1, updated_at = $2
            WHERE id = $3 AND status IN ('queued', 'processing')
            RETURNING *;
        "#,
    )
    .bind(reason)
    .bind(now)
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| PaymentGatewayError::Conflict(format!("Notification {id} is not queued or processing")))
}

/// Queued events are aged by their schedule, processing events by the time they were claimed.
pub async fn fail_stale(
    status: NotificationStatus,
    cutoff: DateTime<Utc>,
    reason: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<NotificationEvent>, PaymentGatewayError> {
    let sql = match status {
        NotificationStatus::Queued => {
            r#"
                UPDATE notification_events SET status = 'failed', last_error = $1, updated_at = $2
                WHERE status = 'queued' AND scheduled_at < $3
                RETURNING *;
            "#
        },
        NotificationStatus::Processing => {
            r#"
                UPDATE notification_events SET status = 'failed', last_error = $1, updated_at = $2
                WHERE status = 'processing' AND updated_at < $3
                RETURNING *;
            "#
        },
        other => {
            return Err(PaymentGatewayError::ValidationError(format!("Only queued or processing events can go stale, not {other}")))
        },
    };
    let events = sqlx::query_as(sql).bind(reason).bind(now).bind(cutoff).fetch_all(conn).await?;
    Ok(events)
}

pub async fn dead_letter(
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<NotificationEvent>, sqlx::Error> {
    sqlx::query_as(
        r#"
            UPDATE notification_events SET status = 'dead', updated_at = $1
            WHERE status = 'failed' AND updated_at < $2
            RETURNING *;
        "#,
    )
    .bind(now)
    .bind(cutoff)
    .fetch_all(conn)
    .await
}

pub async fn requeue(
    id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<NotificationEvent, PaymentGatewayError> {
    sqlx::query_as(
        r#"
            UPDATE notification_events SET
                status = 'queued',
                retry_count = 0,
                scheduled_at = $1,
                last_error = NULL,
                updated_at = $1
            WHERE id = $2 AND status IN ('failed', 'dead')
            RETURNING *;
        "#,
    )
    .bind(now)
    .bind(id)
    .fetch_optional(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => PaymentGatewayError::Conflict(format!(
            "Notification {id} cannot be requeued because an equivalent notification is already live"
        )),
        _ => PaymentGatewayError::from(e),
    })?
    .ok_or_else(|| PaymentGatewayError::Conflict(format!("Notification {id} is not failed or dead")))
}

pub async fn insert_audit(
    entry: NewNotificationAudit,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<NotificationAuditEntry, sqlx::Error> {
    sqlx::query_as(
        r#"
            INSERT INTO notification_audit (order_id, event_type, recipient, action, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *;
        "#,
    )
    .bind(entry.order_id)
    .bind(entry.event_type)
    .bind(entry.recipient)
    .bind(entry.action)
    .bind(entry.details)
    .bind(now)
    .fetch_one(conn)
    .await
}

pub async fn fetch_audit_for_order(
    order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<NotificationAuditEntry>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM notification_audit WHERE order_id = $1 ORDER BY id")
        .bind(order_id)
        .fetch_all(conn)
        .await
}

fn not_processing(id: i64) -> PaymentGatewayError {
    PaymentGatewayError::Conflict(format!("Notification {id} is not being processed"))
}
