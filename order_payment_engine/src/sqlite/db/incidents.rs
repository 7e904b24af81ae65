use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::db_types::{NewSecurityIncident, SecurityIncident};

pub async fn insert(
    incident: NewSecurityIncident,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<SecurityIncident, sqlx::Error> {
    sqlx::query_as(
        r#"
            INSERT INTO security_incidents (
                kind,
                order_id,
                reference,
                expected_amount,
                claimed_amount,
                details,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *;
        "#,
    )
    .bind(incident.kind)
    .bind(incident.order_id)
    .bind(incident.reference)
    .bind(incident.expected_amount)
    .bind(incident.claimed_amount)
    .bind(incident.details)
    .bind(now)
    .fetch_one(conn)
    .await
}

pub async fn fetch_for_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<SecurityIncident>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM security_incidents WHERE order_id = $1 ORDER BY id")
        .bind(order_id)
        .fetch_all(conn)
        .await
}
