use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

/// Adds one to the window's counter and returns the new value.
pub async fn increment(
    identifier: &str,
    window_start: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
            INSERT INTO rate_limit_windows (identifier, window_start, count) VALUES ($1, $2, 1)
            ON CONFLICT (identifier, window_start) DO UPDATE SET count = count + 1
            RETURNING count;
        "#,
    )
    .bind(identifier)
    .bind(window_start)
    .fetch_one(conn)
    .await?;
    Ok(count)
}

pub async fn purge_before(cutoff: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM rate_limit_windows WHERE window_start < $1").bind(cutoff).execute(conn).await?;
    Ok(result.rows_affected())
}
