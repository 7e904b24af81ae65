use crate::{
    db_types::{DedupeRecord, NewPaymentTransaction, NewSecurityIncident, PaymentTransaction, SecurityIncident},
    helpers::DedupeKey,
    traits::{data_objects::DedupOutcome, PaymentGatewayError},
};

#[allow(async_fn_in_trait)]
pub trait PaymentManagement {
    /// Records a verification attempt against a payment reference.
    ///
    /// A new reference creates a `pending` transaction. A known reference bumps `verification_attempts` and refreshes
    /// the payload, unless the transaction is already `completed`, in which case only the attempt counter changes.
    async fn upsert_transaction(&self, txn: NewPaymentTransaction) -> Result<PaymentTransaction, PaymentGatewayError>;

    /// Stores a `completed`, backfilled transaction for an order that is paid but has no transaction record.
    ///
    /// Returns `None` if the order gained a completed transaction in the meantime.
    async fn backfill_transaction(
        &self,
        txn: NewPaymentTransaction,
    ) -> Result<Option<PaymentTransaction>, PaymentGatewayError>;

    async fn fetch_transaction(&self, reference: &str) -> Result<Option<PaymentTransaction>, PaymentGatewayError>;

    async fn fetch_transactions_for_order(&self, order_id: i64)
        -> Result<Vec<PaymentTransaction>, PaymentGatewayError>;

    async fn fetch_completed_transaction(
        &self,
        order_id: i64,
    ) -> Result<Option<PaymentTransaction>, PaymentGatewayError>;

    async fn insert_incident(&self, incident: NewSecurityIncident) -> Result<SecurityIncident, PaymentGatewayError>;

    async fn fetch_incidents_for_order(&self, order_id: i64) -> Result<Vec<SecurityIncident>, PaymentGatewayError>;

    /// Atomically claims the key. Exactly one caller ever sees `Inserted` for a given key.
    async fn try_insert_dedupe_key(&self, key: &DedupeKey) -> Result<DedupOutcome, PaymentGatewayError>;

    async fn fetch_dedupe_record(&self, key: &str) -> Result<Option<DedupeRecord>, PaymentGatewayError>;
}
