//! # Reconciliation sweeper
//!
//! Repairs state that drifted because a process died between two steps. Every repair is idempotent, so a second
//! sweep straight after the first finds nothing to do. Repairs that touch orders go through [`OrderFlowApi`] and so
//! also re-trigger the normal notification path.
//!
//! The repairs, in the order they run:
//! 1. Stuck queue cleanup. Events overdue in `queued` or left in `processing` are failed with a timeout reason.
//! 2. Missing-transaction backfill. Paid orders without a completed transaction get a synthesised, `backfilled` one.
//! 3. Status/payment consistency. Paid orders still `pending` are confirmed. Unpaid orders with a completed
//!    transaction are marked paid (and confirmed if pending).
//! 4. Outbox redelivery. Status history rows whose notifications were never queued are re-enqueued.
//!
//! A failing repair is logged and counted in the report. It does not stop the other repairs.
use std::fmt::Debug;

use chrono::Utc;
use log::*;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    db_types::{NewPaymentTransaction, NotificationStatus, OrderStatusType},
    opg_api::order_flow_api::OrderFlowApi,
    traits::{PaymentGatewayDatabase, PaymentGatewayError},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub stuck_queued: usize,
    pub stuck_processing: usize,
    pub backfilled_transactions: usize,
    pub confirmed_paid_orders: usize,
    pub recovered_payments: usize,
    pub redelivered_notifications: usize,
    pub errors: Vec<String>,
}

impl SweepReport {
    pub fn total_corrections(&self) -> usize {
        self.stuck_queued +
            self.stuck_processing +
            self.backfilled_transactions +
            self.confirmed_paid_orders +
            self.recovered_payments +
            self.redelivered_notifications
    }

    fn record_error(&mut self, repair: &str, e: PaymentGatewayError) {
        error!("🧹️ {repair} failed: {e}");
        self.errors.push(format!("{repair}: {e}"));
    }
}

pub struct ReconciliationApi<B> {
    flow: OrderFlowApi<B>,
}

impl<B: Clone> Clone for ReconciliationApi<B> {
    fn clone(&self) -> Self {
        Self { flow: self.flow.clone() }
    }
}

impl<B> Debug for ReconciliationApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReconciliationApi")
    }
}

impl<B> ReconciliationApi<B> {
    pub fn new(flow: OrderFlowApi<B>) -> Self {
        Self { flow }
    }
}

impl<B> ReconciliationApi<B>
where B: PaymentGatewayDatabase
{
    pub async fn run_sweep(&self) -> Result<SweepReport, PaymentGatewayError> {
        let mut report = SweepReport::default();
        if let Err(e) = self.clean_stuck_notifications(&mut report).await {
            report.record_error("Stuck queue cleanup", e);
        }
        if let Err(e) = self.backfill_missing_transactions(&mut report).await {
            report.record_error("Transaction backfill", e);
        }
        if let Err(e) = self.confirm_paid_orders(&mut report).await {
            report.record_error("Paid order confirmation", e);
        }
        if let Err(e) = self.recover_completed_payments(&mut report).await {
            report.record_error("Payment recovery", e);
        }
        if let Err(e) = self.redeliver_outbox(&mut report).await {
            report.record_error("Outbox redelivery", e);
        }
        if report.total_corrections() > 0 || !report.errors.is_empty() {
            info!(
                "🧹️ Sweep complete. {} corrections, {} errors. {report:?}",
                report.total_corrections(),
                report.errors.len()
            );
        } else {
            debug!("🧹️ Sweep complete. Nothing to repair.");
        }
        Ok(report)
    }

    async fn clean_stuck_notifications(&self, report: &mut SweepReport) -> Result<(), PaymentGatewayError> {
        let config = self.flow.config();
        let now = Utc::now();
        let db = self.flow.db();
        let queued = db
            .fail_stale_notifications(
                NotificationStatus::Queued,
                now - config.queued_timeout,
                "timeout: not delivered within the queue timeout",
            )
            .await?;
        let processing = db
            .fail_stale_notifications(
                NotificationStatus::Processing,
                now - config.processing_timeout,
                "timeout: stuck in processing",
            )
            .await?;
        for event in queued.iter().chain(processing.iter()) {
            warn!("🧹️ Notification #{} ({}) to {} timed out and was failed", event.id, event.template_key, event.recipient);
        }
        report.stuck_queued += queued.len();
        report.stuck_processing += processing.len();
        Ok(())
    }

    async fn backfill_missing_transactions(&self, report: &mut SweepReport) -> Result<(), PaymentGatewayError> {
        let orders = self.flow.db().fetch_paid_orders_without_transaction().await?;
        for order in orders {
            let reference = order.payment_reference.clone().unwrap_or_else(|| format!("backfill_{}", order.order_number));
            let txn = NewPaymentTransaction {
                reference: reference.clone(),
                order_id: order.id,
                amount: order.expected_payment(),
                currency: order.currency.clone(),
                raw_payload: json!({ "backfilled": true, "source": "reconciliation", "order_number": order.order_number }),
            };
            match self.flow.db().backfill_transaction(txn).await {
                Ok(Some(txn)) => {
                    warn!("🧹️ Order #{} was paid without a transaction record. Backfilled #{} ({reference})", order.id, txn.id);
                    report.backfilled_transactions += 1;
                },
                Ok(None) => debug!("🧹️ Order #{} gained a completed transaction in the meantime", order.id),
                Err(e) => report.record_error(&format!("Backfill for order #{}", order.id), e),
            }
        }
        Ok(())
    }

    async fn confirm_paid_orders(&self, report: &mut SweepReport) -> Result<(), PaymentGatewayError> {
        let orders = self.flow.db().fetch_paid_orders_awaiting_confirmation().await?;
        for order in orders {
            let reason = "Reconciliation: order is paid but was never confirmed";
            match self.flow.system_transition(order.id, OrderStatusType::Confirmed, reason).await {
                Ok(updated) if updated.version != order.version => {
                    warn!("🧹️ Order #{} was paid but pending. It is now {}", order.id, updated.status);
                    report.confirmed_paid_orders += 1;
                },
                Ok(_) => {},
                Err(e) => report.record_error(&format!("Confirmation of order #{}", order.id), e),
            }
        }
        Ok(())
    }

    async fn recover_completed_payments(&self, report: &mut SweepReport) -> Result<(), PaymentGatewayError> {
        let orders = self.flow.db().fetch_unpaid_orders_with_completed_transaction().await?;
        for order in orders {
            let txn = match self.flow.db().fetch_completed_transaction(order.id).await? {
                Some(txn) => txn,
                None => continue,
            };
            let reason = format!("Reconciliation: completed transaction {} was never applied", txn.reference);
            match self.flow.confirm_recorded_payment(order.id, &txn.reference, &reason).await {
                Ok(Some(updated)) => {
                    warn!("🧹️ Order #{} had a completed payment but was unpaid. It is now paid and {}", order.id, updated.status);
                    report.recovered_payments += 1;
                },
                Ok(None) => {},
                Err(e) => report.record_error(&format!("Payment recovery for order #{}", order.id), e),
            }
        }
        Ok(())
    }

    async fn redeliver_outbox(&self, report: &mut SweepReport) -> Result<(), PaymentGatewayError> {
        let cutoff = Utc::now() - self.flow.config().outbox_grace;
        let entries = self.flow.db().fetch_unnotified_history(cutoff).await?;
        for entry in entries {
            let order = self.flow.fetch_order(entry.order_id).await?;
            match self.flow.notifications().enqueue_for_history(&order, &entry).await {
                Ok(_) => {
                    self.flow.db().mark_history_notified(entry.id).await?;
                    info!("🧹️ Notifications for history #{} (order #{}) were redelivered", entry.id, order.id);
                    report.redelivered_notifications += 1;
                },
                Err(e) => report.record_error(&format!("Redelivery of history #{}", entry.id), e),
            }
        }
        Ok(())
    }
}
