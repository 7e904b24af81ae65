//! # Order payment server
//! This crate hosts the HTTP surface of the order payment engine. It is responsible for:
//! * Receiving signed payment webhooks from the payment gateway and handing them to the verifier.
//! * Letting customers confirm and poll their payments after the gateway redirects them back.
//! * Exposing the admin entry points: order intake, reference assignment, status transitions and corrections,
//!   notification management, suppressions and on-demand reconciliation.
//! * Running the background workers: the reconciliation sweeper and the notification dispatcher.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! The server exposes the following routes:
//! * `GET /health`: A health check route that returns a 200 OK response.
//! * `POST /gateway/webhook`: Payment notifications from the gateway. HMAC-checked.
//! * `POST /payments/verify`, `GET /payments/{reference}`: Client payment confirmation and polling.
//! * `/api/...`: Admin routes. Callers must send the admin key in the `opg_admin_key` header.

pub mod auth;
pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod helpers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod transport;
pub mod workers;

#[cfg(test)]
mod endpoint_tests;
