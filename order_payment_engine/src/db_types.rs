//! Data types shared by the storage backends and the public API.
//!
//! Every type that maps onto a table row derives [`FromRow`]. Status enums are stored as snake_case text, which is also
//! their serde representation, so that what an admin sees over the API matches what is in the database.
use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use opg_common::{Amount, DEFAULT_CURRENCY_CODE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{types::Json, FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid {kind} value: {value}")]
pub struct ConversionError {
    kind: &'static str,
    value: String,
}

impl ConversionError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self { kind, value: value.to_string() }
    }
}

// Generates `as_str`, `Display` and `FromStr` for the text-backed status enums.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ConversionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ConversionError::new($kind, other)),
                }
            }
        }
    };
}

//--------------------------------------   OrderStatusType     ---------------------------------------------------------
/// The fulfilment status of an order.
///
/// The main chain `pending → confirmed → preparing → ready → out_for_delivery → delivered` only ever moves forward
/// (skipping ahead is allowed). The side branches `cancelled`, `refunded`, `completed` and `returned` can be reached
/// from any non-terminal status and are themselves terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatusType {
    Pending,
    Confirmed,
    Preparing,
    Ready,
    OutForDelivery,
    Delivered,
    Cancelled,
    Refunded,
    Completed,
    Returned,
}

text_enum!(OrderStatusType, "order status", {
    Pending => "pending",
    Confirmed => "confirmed",
    Preparing => "preparing",
    Ready => "ready",
    OutForDelivery => "out_for_delivery",
    Delivered => "delivered",
    Cancelled => "cancelled",
    Refunded => "refunded",
    Completed => "completed",
    Returned => "returned",
});

impl OrderStatusType {
    /// Position on the fulfilment chain, or `None` for the side branches.
    pub fn fulfilment_rank(&self) -> Option<u8> {
        use OrderStatusType::*;
        match self {
            Pending => Some(0),
            Confirmed => Some(1),
            Preparing => Some(2),
            Ready => Some(3),
            OutForDelivery => Some(4),
            Delivered => Some(5),
            Cancelled | Refunded | Completed | Returned => None,
        }
    }

    pub fn is_side_branch(&self) -> bool {
        self.fulfilment_rank().is_none()
    }

    /// Terminal statuses accept no further transitions outside the correction path.
    pub fn is_terminal(&self) -> bool {
        self.is_side_branch()
    }

    /// Whether the regular (non-correction) state machine allows moving from `self` to `target`.
    /// A move to the same status is not a transition and returns false.
    pub fn can_transition_to(&self, target: OrderStatusType) -> bool {
        if *self == target || self.is_terminal() {
            return false;
        }
        match (self.fulfilment_rank(), target.fulfilment_rank()) {
            (_, None) => true,
            (Some(from), Some(to)) => to > from,
            (None, Some(_)) => false,
        }
    }

    /// The notification template used to tell the customer their order reached this status.
    pub fn template_key(&self) -> String {
        format!("order_{}", self.as_str())
    }
}

//--------------------------------------     PaymentStatus     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

text_enum!(PaymentStatus, "payment status", {
    Pending => "pending",
    Paid => "paid",
    Failed => "failed",
    Refunded => "refunded",
});

//--------------------------------------        Order          ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    /// Human-readable, unique order number shown to customers.
    pub order_number: String,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub status: OrderStatusType,
    pub payment_status: PaymentStatus,
    pub total_amount: Amount,
    pub delivery_fee: Amount,
    pub currency: String,
    /// Backend-generated payment reference. Never changes once set.
    pub payment_reference: Option<String>,
    /// Incremented by exactly one on every successful mutation.
    pub version: i64,
    pub last_actor: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// The amount a payment must cover for this order: the order total plus the delivery fee.
    ///
    /// Intake rejects orders where this sum overflows, so the saturation never applies to stored orders.
    pub fn expected_payment(&self) -> Amount {
        self.total_amount.saturating_add(self.delivery_fee)
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }
}

//--------------------------------------        NewOrder       ---------------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub order_number: String,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub total_amount: Amount,
    #[serde(default)]
    pub delivery_fee: Amount,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    pub fn new<S: Into<String>>(order_number: S, total_amount: Amount) -> Self {
        Self {
            order_number: order_number.into(),
            customer_id: None,
            customer_email: None,
            total_amount,
            delivery_fee: Amount::default(),
            currency: DEFAULT_CURRENCY_CODE.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn with_customer<S: Into<String>>(mut self, customer_id: S, email: Option<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self.customer_email = email;
        self
    }

    pub fn with_email<S: Into<String>>(mut self, email: S) -> Self {
        self.customer_email = Some(email.into());
        self
    }

    pub fn with_delivery_fee(mut self, fee: Amount) -> Self {
        self.delivery_fee = fee;
        self
    }

    pub fn with_currency<S: Into<String>>(mut self, currency: S) -> Self {
        self.currency = currency.into();
        self
    }
}

//-----------------------------------------   TransactionStatus   -----------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

text_enum!(TransactionStatus, "transaction status", {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
});

//--------------------------------------   PaymentTransaction   --------------------------------------------------------
/// One record per payment reference. Repeat verifications update the same row.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: i64,
    pub reference: String,
    pub order_id: i64,
    pub amount: Amount,
    pub currency: String,
    pub status: TransactionStatus,
    /// The raw gateway payload, kept for audit.
    pub raw_payload: Json<Value>,
    pub verification_attempts: i64,
    pub last_verified_at: Option<DateTime<Utc>>,
    /// True if the reconciliation sweeper synthesised this record from order data.
    pub backfilled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPaymentTransaction {
    pub reference: String,
    pub order_id: i64,
    pub amount: Amount,
    pub currency: String,
    pub raw_payload: Value,
}

//--------------------------------------   SecurityIncident   ----------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    /// A verification claimed a different amount (or currency) than the order requires.
    AmountMismatch,
    /// A client supplied a payment reference that was not generated by this backend.
    UntrustedReference,
}

text_enum!(IncidentKind, "incident kind", {
    AmountMismatch => "amount_mismatch",
    UntrustedReference => "untrusted_reference",
});

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct SecurityIncident {
    pub id: i64,
    pub kind: IncidentKind,
    pub order_id: Option<i64>,
    pub reference: Option<String>,
    pub expected_amount: Option<Amount>,
    pub claimed_amount: Option<Amount>,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSecurityIncident {
    pub kind: IncidentKind,
    pub order_id: Option<i64>,
    pub reference: Option<String>,
    pub expected_amount: Option<Amount>,
    pub claimed_amount: Option<Amount>,
    pub details: String,
}

//--------------------------------------   StatusHistoryEntry   --------------------------------------------------------
/// An audit row written in the same database transaction as every order mutation. `notified` is flipped once the
/// notifications for the change have been enqueued, which makes this table the outbox for status notifications.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub id: i64,
    pub order_id: i64,
    pub old_status: OrderStatusType,
    pub new_status: OrderStatusType,
    pub old_payment_status: PaymentStatus,
    pub new_payment_status: PaymentStatus,
    pub actor_id: String,
    pub reason: Option<String>,
    pub version: i64,
    pub notified: bool,
    pub created_at: DateTime<Utc>,
}

impl StatusHistoryEntry {
    pub fn status_changed(&self) -> bool {
        self.old_status != self.new_status
    }

    pub fn became_paid(&self) -> bool {
        self.old_payment_status != PaymentStatus::Paid && self.new_payment_status == PaymentStatus::Paid
    }
}

//--------------------------------------   NotificationStatus   --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Queued,
    Processing,
    Sent,
    Failed,
    Dead,
}

text_enum!(NotificationStatus, "notification status", {
    Queued => "queued",
    Processing => "processing",
    Sent => "sent",
    Failed => "failed",
    Dead => "dead",
});

impl NotificationStatus {
    /// Statuses that hold the dedupe key. Failed and dead events release it.
    pub fn holds_dedupe_key(&self) -> bool {
        matches!(self, Self::Queued | Self::Processing | Self::Sent)
    }
}

//--------------------------------------   NotificationEvent   ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: i64,
    pub order_id: Option<i64>,
    pub event_type: String,
    pub recipient: String,
    pub template_key: String,
    pub variables: Json<Value>,
    pub status: NotificationStatus,
    pub retry_count: i64,
    pub dedupe_key: String,
    pub scheduled_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotificationEvent {
    pub order_id: Option<i64>,
    pub event_type: String,
    pub recipient: String,
    pub template_key: String,
    pub variables: Value,
    pub dedupe_key: String,
    pub scheduled_at: DateTime<Utc>,
}

//--------------------------------------   NotificationAudit   ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationAuditAction {
    /// No recipient was given, and none could be resolved from the order.
    SkippedNoRecipient,
    /// The recipient is suppressed.
    SkippedSuppressed,
    /// The enqueue raised an unexpected error after the order transition committed.
    EnqueueFailed,
}

text_enum!(NotificationAuditAction, "notification audit action", {
    SkippedNoRecipient => "skipped_no_recipient",
    SkippedSuppressed => "skipped_suppressed",
    EnqueueFailed => "enqueue_failed",
});

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct NotificationAuditEntry {
    pub id: i64,
    pub order_id: Option<i64>,
    pub event_type: String,
    pub recipient: Option<String>,
    pub action: NotificationAuditAction,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotificationAudit {
    pub order_id: Option<i64>,
    pub event_type: String,
    pub recipient: Option<String>,
    pub action: NotificationAuditAction,
    pub details: String,
}

//--------------------------------------   SuppressionEntry   ----------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    HardBounce,
    Complaint,
    Unsubscribe,
}

text_enum!(SuppressionReason, "suppression reason", {
    HardBounce => "hard_bounce",
    Complaint => "complaint",
    Unsubscribe => "unsubscribe",
});

impl SuppressionReason {
    /// Hard bounces and complaints block every message. An unsubscribe only opts out of optional mail, so
    /// transactional order notifications still go out.
    pub fn blocks_transactional(&self) -> bool {
        matches!(self, Self::HardBounce | Self::Complaint)
    }
}

/// A recipient that must not be sent to. `recipient` is either a full (lower-cased) address, or `@domain` to cover a
/// whole domain.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct SuppressionEntry {
    pub id: i64,
    pub recipient: String,
    pub reason: SuppressionReason,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub reactivated_at: Option<DateTime<Utc>>,
    pub reactivated_by: Option<String>,
}

//--------------------------------------     DedupeRecord      ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct DedupeRecord {
    pub key: String,
    pub subject_type: String,
    pub subject_id: String,
    pub action: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod test {
    use super::*;
    use OrderStatusType::*;

    #[test]
    fn forward_only_chain() {
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(OutForDelivery));
        assert!(Ready.can_transition_to(Delivered));
        assert!(!Delivered.can_transition_to(Preparing));
        assert!(!Delivered.can_transition_to(Pending));
        assert!(!Confirmed.can_transition_to(Confirmed));
    }

    #[test]
    fn side_branches() {
        for status in [Pending, Confirmed, Preparing, Ready, OutForDelivery, Delivered] {
            for branch in [Cancelled, Refunded, Completed, Returned] {
                assert!(status.can_transition_to(branch), "{status} -> {branch}");
            }
        }
        for terminal in [Cancelled, Refunded, Completed, Returned] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(Pending));
            assert!(!terminal.can_transition_to(Delivered));
            assert!(!terminal.can_transition_to(Returned));
        }
    }

    #[test]
    fn text_round_trip() {
        assert_eq!("out_for_delivery".parse::<OrderStatusType>().unwrap(), OutForDelivery);
        assert_eq!(OutForDelivery.to_string(), "out_for_delivery");
        assert_eq!(Confirmed.template_key(), "order_confirmed");
        assert!("shipped".parse::<OrderStatusType>().is_err());
        assert_eq!(serde_json::to_string(&PaymentStatus::Paid).unwrap(), "\"paid\"");
        assert_eq!("hard_bounce".parse::<SuppressionReason>().unwrap(), SuppressionReason::HardBounce);
    }

    #[test]
    fn expected_payment_includes_delivery_fee() {
        let now = Utc::now();
        let order = Order {
            id: 1,
            order_number: "O1".into(),
            customer_id: None,
            customer_email: None,
            status: Pending,
            payment_status: PaymentStatus::Pending,
            total_amount: Amount::from(5000),
            delivery_fee: Amount::from(250),
            currency: "NGN".into(),
            payment_reference: None,
            version: 0,
            last_actor: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(order.expected_payment(), Amount::from(5250));
        assert!(!order.is_paid());
    }
}
