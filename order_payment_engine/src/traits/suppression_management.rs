use chrono::{DateTime, Utc};

use crate::{
    db_types::{SuppressionEntry, SuppressionReason},
    traits::PaymentGatewayError,
};

#[allow(async_fn_in_trait)]
pub trait SuppressionManagement {
    /// Suppresses a (normalised) recipient. Suppressing an already active entry leaves it unchanged. Suppressing a
    /// reactivated entry activates it again with the new reason.
    async fn upsert_suppression(
        &self,
        recipient: &str,
        reason: SuppressionReason,
    ) -> Result<SuppressionEntry, PaymentGatewayError>;

    /// Lifts a suppression. Returns `None` if there is no active entry for the recipient.
    async fn reactivate_suppression(
        &self,
        recipient: &str,
        actor_id: &str,
    ) -> Result<Option<SuppressionEntry>, PaymentGatewayError>;

    /// The active entries matching any of the candidate keys (an address and its `@domain`).
    async fn fetch_active_suppressions(
        &self,
        candidates: &[String],
    ) -> Result<Vec<SuppressionEntry>, PaymentGatewayError>;

    /// Counts one send against the identifier's window and returns the count including this one.
    async fn increment_rate_window(
        &self,
        identifier: &str,
        window_start: DateTime<Utc>,
    ) -> Result<i64, PaymentGatewayError>;

    /// Deletes windows that started before `cutoff`. Returns the number removed.
    async fn purge_rate_windows(&self, cutoff: DateTime<Utc>) -> Result<u64, PaymentGatewayError>;
}
