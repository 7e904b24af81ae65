//! # Storage backend contracts
//!
//! This module defines the behaviour that storage backends must expose to be supported by the payment engine. The
//! public API in [`crate::opg_api`] is generic over these traits and never touches SQL itself.
//!
//! * [`PaymentGatewayDatabase`] ties the concerns together and owns the shared error type.
//! * [`OrderManagement`] covers orders, atomic order mutations and the status history outbox.
//! * [`PaymentManagement`] covers payment transactions, security incidents and the dedup store.
//! * [`NotificationManagement`] is the durable notification queue.
//! * [`SuppressionManagement`] covers suppressed recipients and rate-limit windows.
//!
//! [`NotificationTransport`] and [`TemplateRenderer`] are the outbound seams used by the notification dispatcher.
mod data_objects;
mod notification_management;
mod notification_transport;
mod order_management;
mod payment_gateway_database;
mod payment_management;
mod suppression_management;

pub use data_objects::{DedupOutcome, InsertOutcome, MutationResult, OrderMutation};
pub use notification_management::NotificationManagement;
pub use notification_transport::{
    NotificationTransport,
    OutboundMessage,
    PlainTextRenderer,
    RenderedMessage,
    TemplateRenderer,
    TransportError,
};
pub use order_management::OrderManagement;
pub use payment_gateway_database::{PaymentGatewayDatabase, PaymentGatewayError};
pub use payment_management::PaymentManagement;
pub use suppression_management::SuppressionManagement;
