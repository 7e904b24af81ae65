use std::time::Duration as StdDuration;

use chrono::Duration;
use opg_common::Amount;

/// Tunables shared by every engine component.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The largest difference between claimed and expected payment that still counts as a match.
    pub amount_tolerance: Amount,
    /// How long a caller waits for an order's lock before giving up with a transient error.
    pub lock_timeout: StdDuration,
    /// Attempts made on transient failures before an operation reports `Exhausted`.
    pub retry_attempts: u32,
    pub retry_backoff: StdDuration,
    /// Failed deliveries after which a notification is marked `failed`.
    pub max_notification_retries: i64,
    /// Base delay before a failed delivery is retried. Grows linearly with the attempt count.
    pub notification_backoff: Duration,
    pub dispatch_batch_size: i64,
    pub rate_limit_window: Duration,
    /// Sends allowed per recipient per window.
    pub rate_limit_max: i64,
    pub queued_timeout: Duration,
    pub processing_timeout: Duration,
    /// Unnotified history rows younger than this are left to the post-commit hook.
    pub outbox_grace: Duration,
    /// How long a `failed` notification stays failed before it is parked as `dead`.
    pub dead_letter_after: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            amount_tolerance: Amount::from(1),
            lock_timeout: StdDuration::from_secs(5),
            retry_attempts: 3,
            retry_backoff: StdDuration::from_millis(50),
            max_notification_retries: 3,
            notification_backoff: Duration::minutes(1),
            dispatch_batch_size: 50,
            rate_limit_window: Duration::hours(1),
            rate_limit_max: 20,
            queued_timeout: Duration::hours(1),
            processing_timeout: Duration::minutes(30),
            outbox_grace: Duration::minutes(5),
            dead_letter_after: Duration::hours(24),
        }
    }
}
