//! # The notification queue
//!
//! `enqueue` is the only way notifications get into the durable queue. It is idempotent: the dedupe key derived from
//! `(event_type, order_id, recipient, template_key)` is guarded by a partial unique index, so concurrent or repeated
//! calls collapse onto one live event, and the losers are told which event won.
//!
//! Enqueueing never fails because of the recipient. A missing or suppressed recipient results in a `skipped` outcome
//! and an audit row, never an error, so that business flows do not depend on who can be mailed.
use std::fmt::Debug;

use chrono::{Duration, Utc};
use log::*;
use serde_json::{json, Value};

use crate::{
    db_types::{
        NewNotificationAudit,
        NewNotificationEvent,
        NotificationAuditAction,
        NotificationAuditEntry,
        NotificationEvent,
        Order,
        StatusHistoryEntry,
    },
    helpers::DedupeKey,
    opg_api::{
        auth_context::{AuthContext, Role},
        engine_config::EngineConfig,
        notification_objects::{
            EnqueueRequest,
            EnqueueResult,
            ORDER_STATUS_UPDATE,
            PAYMENT_CONFIRMATION,
            PAYMENT_RECEIVED_TEMPLATE,
        },
        suppression_api::{normalize_recipient, SuppressionApi},
    },
    traits::{InsertOutcome, PaymentGatewayDatabase, PaymentGatewayError},
};

pub struct NotificationQueue<B> {
    db: B,
    suppressions: SuppressionApi<B>,
}

impl<B: Clone> Clone for NotificationQueue<B> {
    fn clone(&self) -> Self {
        Self { db: self.db.clone(), suppressions: self.suppressions.clone() }
    }
}

impl<B> Debug for NotificationQueue<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NotificationQueue")
    }
}

impl<B: Clone> NotificationQueue<B> {
    pub fn new(db: B, config: EngineConfig) -> Self {
        let suppressions = SuppressionApi::new(db.clone(), config);
        Self { db, suppressions }
    }
}

impl<B> NotificationQueue<B>
where B: PaymentGatewayDatabase
{
    /// The enqueue entry point. Admins and internal flows only.
    pub async fn enqueue(
        &self,
        request: EnqueueRequest,
        auth: &AuthContext,
    ) -> Result<EnqueueResult, PaymentGatewayError> {
        auth.require_any(&[Role::Admin, Role::System])?;
        if request.event_type.trim().is_empty() || request.template_key.trim().is_empty() {
            return Err(PaymentGatewayError::ValidationError("event_type and template_key are required".into()));
        }
        let order = self
            .db
            .fetch_order(request.order_id)
            .await?
            .ok_or_else(|| PaymentGatewayError::OrderNotFound(request.order_id.to_string()))?;
        let EnqueueRequest { event_type, recipient, template_key, variables, .. } = request;
        self.enqueue_resolved(&order, event_type.trim(), recipient, template_key.trim(), variables).await
    }

    /// Enqueues the notifications owed for one status history row: a status update if the status changed, and a
    /// payment confirmation if the order just became paid.
    pub(crate) async fn enqueue_for_history(
        &self,
        order: &Order,
        entry: &StatusHistoryEntry,
    ) -> Result<Vec<EnqueueResult>, PaymentGatewayError> {
        let mut results = Vec::with_capacity(2);
        let variables = json!({
            "order_number": order.order_number,
            "status": entry.new_status,
            "previous_status": entry.old_status,
            "payment_status": entry.new_payment_status,
            "amount": order.expected_payment().to_string(),
            "currency": order.currency,
            "reason": entry.reason,
        });
        if entry.status_changed() {
            let template = entry.new_status.template_key();
            let result = self.enqueue_resolved(order, ORDER_STATUS_UPDATE, None, &template, variables.clone()).await?;
            results.push(result);
        }
        if entry.became_paid() {
            let result = self
                .enqueue_resolved(order, PAYMENT_CONFIRMATION, None, PAYMENT_RECEIVED_TEMPLATE, variables)
                .await?;
            results.push(result);
        }
        Ok(results)
    }

    async fn enqueue_resolved(
        &self,
        order: &Order,
        event_type: &str,
        recipient: Option<String>,
        template_key: &str,
        variables: Value,
    ) -> Result<EnqueueResult, PaymentGatewayError> {
        let recipient = recipient
            .filter(|r| !r.trim().is_empty())
            .or_else(|| order.customer_email.clone().filter(|r| !r.trim().is_empty()))
            .map(|r| normalize_recipient(&r));
        let Some(recipient) = recipient else {
            warn!("📬️ No recipient for {event_type}/{template_key} on order #{}. Nothing was queued.", order.id);
            self.audit(order, event_type, None, NotificationAuditAction::SkippedNoRecipient, "no recipient").await?;
            return Ok(EnqueueResult::skipped("no recipient"));
        };
        if let Some(entry) = self.suppressions.is_blocking(&recipient).await? {
            info!("📬️ {recipient} is suppressed ({}). {event_type} for order #{} was not queued.", entry.reason, order.id);
            let details = format!("suppressed: {}", entry.reason);
            self.audit(order, event_type, Some(&recipient), NotificationAuditAction::SkippedSuppressed, &details).await?;
            return Ok(EnqueueResult::skipped("suppressed"));
        }
        let key = DedupeKey::for_notification(event_type, Some(order.id), &recipient, template_key);
        let event = NewNotificationEvent {
            order_id: Some(order.id),
            event_type: event_type.to_string(),
            recipient,
            template_key: template_key.to_string(),
            variables,
            dedupe_key: key.to_string(),
            scheduled_at: Utc::now(),
        };
        match self.db.insert_notification(event).await? {
            InsertOutcome::Created(ev) => {
                debug!("📬️ Queued {} #{} ({}) for order #{}", ev.event_type, ev.id, ev.template_key, order.id);
                Ok(EnqueueResult::created(ev.id))
            },
            InsertOutcome::Existing(ev) => {
                debug!("📬️ {} for order #{} is already queued as #{}", ev.template_key, order.id, ev.id);
                Ok(EnqueueResult::deduplicated(ev.id))
            },
        }
    }

    /// Records that the notifications for a committed change could not be queued. The history row stays
    /// unnotified, so the sweeper will try again.
    pub(crate) async fn record_enqueue_failure(&self, order: &Order, error: &PaymentGatewayError) {
        let details = error.to_string();
        if let Err(e) = self.audit(order, ORDER_STATUS_UPDATE, None, NotificationAuditAction::EnqueueFailed, &details).await
        {
            error!("📬️ Could not even record the enqueue failure for order #{}: {e}", order.id);
        }
    }

    async fn audit(
        &self,
        order: &Order,
        event_type: &str,
        recipient: Option<&str>,
        action: NotificationAuditAction,
        details: &str,
    ) -> Result<NotificationAuditEntry, PaymentGatewayError> {
        let entry = NewNotificationAudit {
            order_id: Some(order.id),
            event_type: event_type.to_string(),
            recipient: recipient.map(String::from),
            action,
            details: details.to_string(),
        };
        self.db.record_notification_audit(entry).await
    }

    pub async fn notifications_for_order(&self, order_id: i64) -> Result<Vec<NotificationEvent>, PaymentGatewayError> {
        self.db.fetch_notifications_for_order(order_id).await
    }

    pub async fn audit_for_order(&self, order_id: i64) -> Result<Vec<NotificationAuditEntry>, PaymentGatewayError> {
        self.db.fetch_notification_audit(order_id).await
    }

    /// Manual recovery for a failed or dead event. The event gets a fresh retry budget.
    pub async fn requeue(&self, event_id: i64, auth: &AuthContext) -> Result<NotificationEvent, PaymentGatewayError> {
        auth.require_any(&[Role::Admin])?;
        if self.db.fetch_notification(event_id).await?.is_none() {
            return Err(PaymentGatewayError::NotFound(format!("notification {event_id}")));
        }
        let event = self.db.requeue_notification(event_id).await?;
        info!("📬️ {} requeued notification #{event_id}", auth.actor_id);
        Ok(event)
    }

    /// Parks events that have been `failed` for longer than `older_than` as `dead`.
    pub async fn dead_letter_failed(&self, older_than: Duration) -> Result<Vec<NotificationEvent>, PaymentGatewayError> {
        let parked = self.db.dead_letter_failed(Utc::now() - older_than).await?;
        if !parked.is_empty() {
            let ids = parked.iter().map(|e| e.id.to_string()).collect::<Vec<_>>().join(", ");
            warn!("📬️ {} failed notifications were moved to the dead-letter state: {ids}", parked.len());
        }
        Ok(parked)
    }
}
