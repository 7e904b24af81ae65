use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::{db_types::DedupeRecord, helpers::DedupeKey, traits::DedupOutcome};

/// Claims the key. The primary key makes this atomic across connections and processes.
pub async fn try_insert(
    key: &DedupeKey,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<DedupOutcome, sqlx::Error> {
    let result = sqlx::query(
        r#"
            INSERT INTO dedupe_keys (key, subject_type, subject_id, action, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (key) DO NOTHING;
        "#,
    )
    .bind(key.as_str())
    .bind(key.subject_type())
    .bind(key.subject_id())
    .bind(key.action())
    .bind(now)
    .execute(conn)
    .await?;
    if result.rows_affected() == 1 {
        Ok(DedupOutcome::Inserted)
    } else {
        Ok(DedupOutcome::AlreadyExists)
    }
}

pub async fn fetch(key: &str, conn: &mut SqliteConnection) -> Result<Option<DedupeRecord>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM dedupe_keys WHERE key = $1").bind(key).fetch_optional(conn).await
}
