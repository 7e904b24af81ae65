use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::db_types::{SuppressionEntry, SuppressionReason};

pub async fn upsert(
    recipient: &str,
    reason: SuppressionReason,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<SuppressionEntry, sqlx::Error> {
    // An active entry is immutable. Only a reactivated one takes the new reason.
    sqlx::query_as(
        r#"
            INSERT INTO suppressions (recipient, reason, created_at) VALUES ($1, $2, $3)
            ON CONFLICT (recipient) DO UPDATE SET
                reason = CASE WHEN active = 1 THEN reason ELSE excluded.reason END,
                active = 1
            RETURNING *;
        "#,
    )
    .bind(recipient)
    .bind(reason)
    .bind(now)
    .fetch_one(conn)
    .await
}

pub async fn reactivate(
    recipient: &str,
    actor_id: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<SuppressionEntry>, sqlx::Error> {
    sqlx::query_as(
        r#"
            UPDATE suppressions SET active = 0, reactivated_at = $1, reactivated_by = $2
            WHERE recipient = $3 AND active = 1
            RETURNING *;
        "#,
    )
    .bind(now)
    .bind(actor_id)
    .bind(recipient)
    .fetch_optional(conn)
    .await
}

pub async fn fetch_active(
    candidates: &[String],
    conn: &mut SqliteConnection,
) -> Result<Vec<SuppressionEntry>, sqlx::Error> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM suppressions WHERE active = 1 AND recipient IN (");
    let mut list = builder.separated(", ");
    for candidate in candidates {
        list.push_bind(candidate);
    }
    list.push_unseparated(")");
    builder.build_query_as().fetch_all(conn).await
}
