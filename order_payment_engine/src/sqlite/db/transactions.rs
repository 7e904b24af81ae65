use chrono::{DateTime, Utc};
use sqlx::{types::Json, SqliteConnection};

use crate::{
    db_types::{NewPaymentTransaction, PaymentTransaction},
    traits::PaymentGatewayError,
};

/// Creates a pending transaction for the reference, or counts another verification attempt against the existing one.
/// A completed transaction keeps its amount and payload.
pub async fn upsert(
    txn: NewPaymentTransaction,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<PaymentTransaction, sqlx::Error> {
    sqlx::query_as(
        r#"
            INSERT INTO payment_transactions (
                reference,
                order_id,
                amount,
                currency,
                raw_payload,
                last_verified_at,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $6, $6)
            ON CONFLICT (reference) DO UPDATE SET
                verification_attempts = verification_attempts + 1,
                last_verified_at = excluded.last_verified_at,
                amount = CASE WHEN status = 'completed' THEN amount ELSE excluded.amount END,
                raw_payload = CASE WHEN status = 'completed' THEN raw_payload ELSE excluded.raw_payload END,
                updated_at = excluded.updated_at
            RETURNING *;
        "#,
    )
    .bind(txn.reference)
    .bind(txn.order_id)
    .bind(txn.amount)
    .bind(txn.currency)
    .bind(Json(txn.raw_payload))
    .bind(now)
    .fetch_one(conn)
    .await
}

/// Inserts a completed, backfilled transaction. If a transaction with the same reference exists, it is promoted to
/// completed instead. Returns `None` if the order already has a different completed transaction.
pub async fn insert_backfilled(
    txn: NewPaymentTransaction,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<PaymentTransaction>, PaymentGatewayError> {
    let result = sqlx::query_as(
        r#"
            INSERT INTO payment_transactions (
                reference,
                order_id,
                amount,
                currency,
                status,
                raw_payload,
                verification_attempts,
                backfilled,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, 'completed', $5, 0, 1, $6, $6)
            ON CONFLICT (reference) DO UPDATE SET
                status = 'completed',
                backfilled = 1,
                updated_at = excluded.updated_at
            WHERE status != 'completed'
            RETURNING *;
        "#,
    )
    .bind(txn.reference)
    .bind(txn.order_id)
    .bind(txn.amount)
    .bind(txn.currency)
    .bind(Json(txn.raw_payload))
    .bind(now)
    .fetch_optional(conn)
    .await;
    match result {
        Ok(txn) => Ok(txn),
        Err(sqlx::Error::Database(err)) if err.is_unique_violation() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Marks a transaction completed. Fails with `Conflict` if the order already has another completed transaction.
pub async fn mark_completed(
    id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<PaymentTransaction, PaymentGatewayError> {
    sqlx::query_as(
        "UPDATE payment_transactions SET status = 'completed', updated_at = $1 WHERE id = $2 RETURNING *",
    )
    .bind(now)
    .bind(id)
    .fetch_optional(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => {
            PaymentGatewayError::Conflict(format!("Another transaction already completed the order of transaction {id}"))
        },
        _ => PaymentGatewayError::from(e),
    })?
    .ok_or_else(|| PaymentGatewayError::NotFound(format!("payment transaction {id}")))
}

pub async fn fetch_by_reference(
    reference: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<PaymentTransaction>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM payment_transactions WHERE reference = $1").bind(reference).fetch_optional(conn).await
}

pub async fn fetch_for_order(
    order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<PaymentTransaction>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM payment_transactions WHERE order_id = $1 ORDER BY id")
        .bind(order_id)
        .fetch_all(conn)
        .await
}

pub async fn fetch_completed_for_order(
    order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<PaymentTransaction>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM payment_transactions WHERE order_id = $1 AND status = 'completed'")
        .bind(order_id)
        .fetch_optional(conn)
        .await
}
