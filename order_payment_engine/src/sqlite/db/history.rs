use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::{db_types::StatusHistoryEntry, traits::OrderMutation};

pub async fn insert_entry(
    mutation: &OrderMutation,
    version: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<StatusHistoryEntry, sqlx::Error> {
    sqlx::query_as(
        r#"
            INSERT INTO order_status_history (
                order_id,
                old_status,
                new_status,
                old_payment_status,
                new_payment_status,
                actor_id,
                reason,
                version,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *;
        "#,
    )
    .bind(mutation.order_id)
    .bind(mutation.old_status)
    .bind(mutation.new_status)
    .bind(mutation.old_payment_status)
    .bind(mutation.new_payment_status)
    .bind(&mutation.actor_id)
    .bind(&mutation.reason)
    .bind(version)
    .bind(now)
    .fetch_one(conn)
    .await
}

pub async fn fetch_for_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<StatusHistoryEntry>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM order_status_history WHERE order_id = $1 ORDER BY id")
        .bind(order_id)
        .fetch_all(conn)
        .await
}

pub async fn fetch_unnotified(
    cutoff: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<StatusHistoryEntry>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM order_status_history WHERE notified = 0 AND created_at < $1 ORDER BY id")
        .bind(cutoff)
        .fetch_all(conn)
        .await
}

pub async fn mark_notified(id: i64, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE order_status_history SET notified = 1 WHERE id = $1").bind(id).execute(conn).await?;
    Ok(())
}
