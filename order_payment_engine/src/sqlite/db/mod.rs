//! # SQLite Database methods
//!
//! This module contains "low-level" SQLite database interactions.
//!
//! All these interactions are simple functions (rather than stateful structs) that accept a
//! `&mut SqliteConnection` argument. Callers can obtain a connection from a pool, or open an atomic transaction as the
//! need arises and call through to the functions without any other changes.
//!
//! None of these functions read the clock through SQL. Timestamps are passed in from the caller so that every stored
//! value has the same text format.
use std::{env, str::FromStr, time::Duration};

use log::info;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Error as SqlxError,
    SqlitePool,
};

pub mod dedupe;
pub mod history;
pub mod incidents;
pub mod notifications;
pub mod orders;
pub mod rate_limits;
pub mod suppressions;
pub mod transactions;

const SQLITE_DB_URL: &str = "sqlite://data/order_payments.db";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn db_url() -> String {
    let result = env::var("OPG_DATABASE_URL").unwrap_or_else(|_| {
        info!("OPG_DATABASE_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("Using database URL: {result}");
    result
}

/// Opens a pool in WAL mode so that readers never block the single writer. Writers wait up to `BUSY_TIMEOUT` for the
/// write lock before SQLite reports `SQLITE_BUSY`.
pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqlxError> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
    Ok(pool)
}
