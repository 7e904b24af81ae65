use opg_common::Amount;
use thiserror::Error;

use crate::{
    db_types::OrderStatusType,
    helpers::OrderLocks,
    traits::{NotificationManagement, OrderManagement, PaymentManagement, SuppressionManagement},
};

/// The full set of behaviour a storage backend must provide to run the payment engine.
///
/// The sub-traits split the behaviour by concern:
/// * [`OrderManagement`]: orders, their atomic mutations and the status history outbox.
/// * [`PaymentManagement`]: payment transactions, security incidents and the generic dedup store.
/// * [`NotificationManagement`]: the durable notification queue and its audit trail.
/// * [`SuppressionManagement`]: suppressed recipients and rate-limit windows.
///
/// Backends must make every method that changes state atomic. Lost update protection for orders comes from the
/// `expected_version` check in [`OrderManagement::apply_order_mutation`].
#[allow(async_fn_in_trait)]
pub trait PaymentGatewayDatabase:
    Clone + OrderManagement + PaymentManagement + NotificationManagement + SuppressionManagement
{
    /// The URL of the database
    fn url(&self) -> &str;

    /// The per-order lock table. Clones of a backend handle must return the same table, so that every API built on
    /// the same database serialises on the same locks.
    fn order_locks(&self) -> &OrderLocks;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), PaymentGatewayError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum PaymentGatewayError {
    #[error("Invalid request: {0}")]
    ValidationError(String),
    #[error("The requested order {0} does not exist")]
    OrderNotFound(String),
    #[error("The requested {0} does not exist")]
    NotFound(String),
    #[error("Illegal order status change from {from} to {to}")]
    InvalidTransition { from: OrderStatusType, to: OrderStatusType },
    #[error("The payment claims {claimed}, but the order requires {expected}")]
    AmountMismatch { expected: Amount, claimed: Amount },
    #[error("Conflicting update: {0}")]
    Conflict(String),
    #[error("Temporarily unavailable, safe to retry: {0}")]
    Transient(String),
    #[error("Gave up after repeated transient failures: {0}")]
    Exhausted(String),
    #[error("The action '{0}' has already been performed")]
    DuplicateAction(String),
    #[error("Insufficient permissions: {0}")]
    Unauthorized(String),
    #[error("We have an internal database engine (configuration/uptime etc.) error: {0}")]
    DatabaseError(String),
}

impl PaymentGatewayError {
    /// Transient failures never leave partial state behind, so the whole operation can be repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

// Primary result codes for SQLITE_BUSY and SQLITE_LOCKED. Extended codes share the low byte.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

impl From<sqlx::Error> for PaymentGatewayError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut => Self::Transient("Timed out waiting for a database connection".into()),
            sqlx::Error::Database(db) => {
                let code = db.code().and_then(|c| c.parse::<i32>().ok()).map(|c| c & 0xff);
                if matches!(code, Some(SQLITE_BUSY) | Some(SQLITE_LOCKED)) {
                    Self::Transient(db.message().to_string())
                } else if db.is_unique_violation() {
                    Self::Conflict(db.message().to_string())
                } else {
                    Self::DatabaseError(e.to_string())
                }
            },
            _ => Self::DatabaseError(e.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for PaymentGatewayError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        Self::DatabaseError(format!("Migration failed: {e}"))
    }
}
