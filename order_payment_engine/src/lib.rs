//! Order Payment Engine
//!
//! The engine verifies payments for food orders, keeps order status consistent with payment state, and delivers the
//! notifications that order changes trigger. It is storage-agnostic: the public API is generic over the backend
//! traits in [`mod@traits`], and an SQLite backend is provided in [`mod@sqlite`].
//!
//! The library is divided into these sections:
//! 1. Data types ([`mod@db_types`]) shared by the backends and the API.
//! 2. Backend contracts ([`mod@traits`]) and the SQLite backend ([`mod@sqlite`]). You should never need to access the
//!    database directly. Use the public API instead.
//! 3. The public API ([`mod@opg_api`]): order flow, payment verification, the notification queue and its worker,
//!    suppressions, and the reconciliation sweeper.
//!
//! The engine also publishes events when orders change or payments are rejected. A simple actor framework in
//! [`mod@events`] lets you hook into these without coupling to the engine.
pub mod db_types;
pub mod events;
pub mod helpers;
pub mod opg_api;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use opg_api::{
    auth_context::{AuthContext, Role},
    dispatch_api::NotificationDispatcher,
    engine_config::EngineConfig,
    notification_api::NotificationQueue,
    notification_objects,
    order_flow_api::OrderFlowApi,
    order_objects,
    payment_api::PaymentApi,
    payment_objects,
    reconciliation_api::{ReconciliationApi, SweepReport},
    suppression_api::{RateLimitDecision, SuppressionApi},
};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use traits::{
    NotificationManagement,
    NotificationTransport,
    OrderManagement,
    PaymentGatewayDatabase,
    PaymentGatewayError,
    PaymentManagement,
    SuppressionManagement,
    TemplateRenderer,
};
