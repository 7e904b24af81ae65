use chrono::{DateTime, Utc};
use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewOrder, Order},
    traits::{OrderMutation, PaymentGatewayError},
};

/// Inserts the order into the database, returning `false` in the second parameter if an order with the same order
/// number already exists.
pub async fn idempotent_insert(
    order: NewOrder,
    conn: &mut SqliteConnection,
) -> Result<(Order, bool), PaymentGatewayError> {
    let number = order.order_number.clone();
    let inserted: Option<Order> = sqlx::query_as(
        r#"
            INSERT INTO orders (
                order_number,
                customer_id,
                customer_email,
                total_amount,
                delivery_fee,
                currency,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            ON CONFLICT (order_number) DO NOTHING
            RETURNING *;
        "#,
    )
    .bind(order.order_number)
    .bind(order.customer_id)
    .bind(order.customer_email.map(|e| e.trim().to_lowercase()))
    .bind(order.total_amount)
    .bind(order.delivery_fee)
    .bind(order.currency)
    .bind(order.created_at)
    .fetch_optional(&mut *conn)
    .await?;
    match inserted {
        Some(order) => {
            debug!("📝️ Order [{}] inserted with id {}", order.order_number, order.id);
            Ok((order, true))
        },
        None => {
            let existing = fetch_order_by_number(&number, conn)
                .await?
                .ok_or_else(|| PaymentGatewayError::DatabaseError(format!("Order {number} vanished after insert")))?;
            Ok((existing, false))
        },
    }
}

pub async fn fetch_order(id: i64, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM orders WHERE id = $1").bind(id).fetch_optional(conn).await
}

pub async fn fetch_order_by_number(number: &str, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM orders WHERE order_number = $1").bind(number).fetch_optional(conn).await
}

pub async fn fetch_order_by_reference(
    reference: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM orders WHERE payment_reference = $1").bind(reference).fetch_optional(conn).await
}

/// Sets the reference on an order that has none, provided the version still matches.
/// Returns `None` if the guard did not match.
pub async fn set_payment_reference(
    id: i64,
    expected_version: i64,
    reference: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, PaymentGatewayError> {
    let order = sqlx::query_as(
        r#"
            UPDATE orders SET payment_reference = $1, version = version + 1, updated_at = $2
            WHERE id = $3 AND version = $4 AND payment_reference IS NULL
            RETURNING *;
        "#,
    )
    .bind(reference)
    .bind(now)
    .bind(id)
    .bind(expected_version)
    .fetch_optional(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => {
            PaymentGatewayError::Conflict(format!("Payment reference {reference} is already in use"))
        },
        _ => PaymentGatewayError::from(e),
    })?;
    Ok(order)
}

/// Writes the new status pair and bumps the version, but only if the stored version is the one the mutation was
/// computed from. Returns `None` if the guard did not match.
pub async fn update_state(
    mutation: &OrderMutation,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    sqlx::query_as(
        r#"
            UPDATE orders SET
                status = $1,
                payment_status = $2,
                last_actor = $3,
                version = version + 1,
                updated_at = $4
            WHERE id = $5 AND version = $6
            RETURNING *;
        "#,
    )
    .bind(mutation.new_status)
    .bind(mutation.new_payment_status)
    .bind(&mutation.actor_id)
    .bind(now)
    .bind(mutation.order_id)
    .bind(mutation.expected_version)
    .fetch_optional(conn)
    .await
}

pub async fn paid_orders_awaiting_confirmation(conn: &mut SqliteConnection) -> Result<Vec<Order>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM orders WHERE payment_status = 'paid' AND status = 'pending' ORDER BY id")
        .fetch_all(conn)
        .await
}

pub async fn paid_orders_without_transaction(conn: &mut SqliteConnection) -> Result<Vec<Order>, sqlx::Error> {
    sqlx::query_as(
        r#"
            SELECT * FROM orders o
            WHERE o.payment_status = 'paid'
              AND NOT EXISTS (
                SELECT 1 FROM payment_transactions t WHERE t.order_id = o.id AND t.status = 'completed'
              )
            ORDER BY o.id;
        "#,
    )
    .fetch_all(conn)
    .await
}

pub async fn unpaid_orders_with_completed_transaction(conn: &mut SqliteConnection) -> Result<Vec<Order>, sqlx::Error> {
    sqlx::query_as(
        r#"
            SELECT o.* FROM orders o
            JOIN payment_transactions t ON t.order_id = o.id AND t.status = 'completed'
            WHERE o.payment_status = 'pending'
            ORDER BY o.id;
        "#,
    )
    .fetch_all(conn)
    .await
}
