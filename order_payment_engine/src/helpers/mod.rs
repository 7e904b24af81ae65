mod dedupe_key;
mod order_locks;
mod payment_reference;
mod retry;

pub use dedupe_key::DedupeKey;
pub use order_locks::{OrderLockGuard, OrderLocks};
pub use payment_reference::{PaymentReference, PaymentReferenceError, REFERENCE_PREFIX};
pub use retry::with_retries;
