//! # Order payment engine public API
//!
//! The `opg_api` module exposes the programmatic API of the engine. Every API is created by supplying a backend that
//! implements [`crate::traits::PaymentGatewayDatabase`].
//!
//! * [`order_flow_api`] owns order status. Every status change, whatever its source, goes through it.
//! * [`payment_api`] assigns payment references and verifies payments.
//! * [`notification_api`] is the idempotent enqueue side of the notification queue.
//! * [`dispatch_api`] is the worker side of the queue: claiming, rate limiting, delivery and retries.
//! * [`suppression_api`] manages suppressed recipients and rate-limit windows.
//! * [`reconciliation_api`] is the periodic sweeper that repairs drifted state.
//!
//! Every entry point takes an [`AuthContext`] naming the caller and its roles.
//!
//! # API usage
//!
//! ```rust,ignore
//! use order_payment_engine::{AuthContext, EngineConfig, EventProducers, OrderFlowApi, PaymentApi, SqliteDatabase};
//! let db = SqliteDatabase::new_with_url(...).await?;
//! let flow = OrderFlowApi::new(db, EventProducers::default(), EngineConfig::default());
//! let payments = PaymentApi::new(flow.clone());
//! let result = payments.verify(request, &AuthContext::gateway()).await?;
//! ```

pub mod auth_context;
pub mod dispatch_api;
pub mod engine_config;
pub mod notification_api;
pub mod notification_objects;
pub mod order_flow_api;
pub mod order_objects;
pub mod payment_api;
pub mod payment_objects;
pub mod reconciliation_api;
pub mod suppression_api;

pub use auth_context::{AuthContext, Role};
pub use engine_config::EngineConfig;
