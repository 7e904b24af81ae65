//! # The notification worker
//!
//! Each `dispatch_once` call claims a batch of due events and works through them one by one:
//!
//! * Recipients that have been hard-bounced or complained since the event was queued are not contacted. The event is
//!   failed with a `suppressed` reason.
//! * Recipients over their rate limit are deferred to the start of the next window. Deferral does not use up a retry.
//! * Everything else is rendered and handed to the transport. A failed delivery goes back in the queue with a linear
//!   backoff until the retry budget is spent, after which the event is `failed` and waits for dead-lettering.
//!
//! Events are claimed atomically, so any number of dispatchers may run against the same database.
use std::fmt::Debug;

use chrono::Utc;
use log::*;

use crate::{
    db_types::{NotificationEvent, NotificationStatus},
    opg_api::{
        engine_config::EngineConfig,
        notification_objects::DispatchReport,
        suppression_api::{RateLimitDecision, SuppressionApi},
    },
    traits::{
        NotificationTransport,
        OutboundMessage,
        PaymentGatewayDatabase,
        PaymentGatewayError,
        TemplateRenderer,
        TransportError,
    },
};

pub struct NotificationDispatcher<B, T, R> {
    db: B,
    suppressions: SuppressionApi<B>,
    transport: T,
    renderer: R,
    config: EngineConfig,
}

impl<B, T, R> Debug for NotificationDispatcher<B, T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NotificationDispatcher")
    }
}

impl<B: Clone, T, R> NotificationDispatcher<B, T, R> {
    pub fn new(db: B, transport: T, renderer: R, config: EngineConfig) -> Self {
        let suppressions = SuppressionApi::new(db.clone(), config.clone());
        Self { db, suppressions, transport, renderer, config }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

enum Outcome {
    Sent,
    Retried,
    Failed,
    Deferred,
    Suppressed,
}

impl<B, T, R> NotificationDispatcher<B, T, R>
where
    B: PaymentGatewayDatabase,
    T: NotificationTransport,
    R: TemplateRenderer,
{
    /// Moves up to one batch of due events to `processing`.
    pub async fn claim_batch(&self) -> Result<Vec<NotificationEvent>, PaymentGatewayError> {
        self.db.claim_due_notifications(Utc::now(), self.config.dispatch_batch_size).await
    }

    /// Claims one batch and processes every event in it.
    ///
    /// A storage error on one event is logged and the event is left in `processing` for the sweeper's stuck-event
    /// cleanup. It does not stop the rest of the batch.
    pub async fn dispatch_once(&self) -> Result<DispatchReport, PaymentGatewayError> {
        let batch = self.claim_batch().await?;
        let mut report = DispatchReport { claimed: batch.len(), ..Default::default() };
        if !batch.is_empty() {
            debug!("📬️ Claimed {} notifications for delivery", batch.len());
        }
        for event in batch {
            match self.process(&event).await {
                Ok(Outcome::Sent) => report.sent += 1,
                Ok(Outcome::Retried) => report.retried += 1,
                Ok(Outcome::Failed) => report.failed += 1,
                Ok(Outcome::Deferred) => report.deferred += 1,
                Ok(Outcome::Suppressed) => report.suppressed += 1,
                Err(e) => error!("📬️ Could not process notification #{}: {e}", event.id),
            }
        }
        if let Err(e) = self.suppressions.purge_expired_windows().await {
            warn!("📬️ Could not purge expired rate-limit windows: {e}");
        }
        Ok(report)
    }

    async fn process(&self, event: &NotificationEvent) -> Result<Outcome, PaymentGatewayError> {
        if let Some(entry) = self.suppressions.is_blocking(&event.recipient).await? {
            info!("📬️ Not sending #{} to {}: suppressed ({})", event.id, event.recipient, entry.reason);
            self.db.fail_notification(event.id, &format!("suppressed: {}", entry.reason)).await?;
            return Ok(Outcome::Suppressed);
        }
        if let RateLimitDecision::Limited { retry_at } = self.suppressions.check_rate_limit(&event.recipient).await? {
            debug!("📬️ {} is rate limited. #{} deferred to {retry_at}", event.recipient, event.id);
            self.db.defer_notification(event.id, retry_at).await?;
            return Ok(Outcome::Deferred);
        }
        let rendered = match self.renderer.render(&event.template_key, &event.variables.0) {
            Ok(r) => r,
            Err(e) => {
                error!("📬️ Notification #{} cannot be rendered and will not be retried: {e}", event.id);
                self.db.fail_notification(event.id, &e.to_string()).await?;
                return Ok(Outcome::Failed);
            },
        };
        let message = OutboundMessage {
            event_id: event.id,
            recipient: event.recipient.clone(),
            template_key: event.template_key.clone(),
            subject: rendered.subject,
            body: rendered.body,
            dedupe_key: event.dedupe_key.clone(),
        };
        match self.transport.deliver(&message).await {
            Ok(()) => {
                self.db.mark_notification_sent(event.id).await?;
                debug!("📬️ Sent #{} ({}) to {}", event.id, event.template_key, event.recipient);
                Ok(Outcome::Sent)
            },
            Err(e) => self.handle_delivery_failure(event, e).await,
        }
    }

    async fn handle_delivery_failure(
        &self,
        event: &NotificationEvent,
        error: TransportError,
    ) -> Result<Outcome, PaymentGatewayError> {
        let attempt = i32::try_from(event.retry_count + 1).unwrap_or(i32::MAX);
        let retry_at = Utc::now() + self.config.notification_backoff * attempt;
        let max_retries = self.config.max_notification_retries;
        let updated = self.db.record_delivery_failure(event.id, &error.to_string(), max_retries, retry_at).await?;
        if updated.status == NotificationStatus::Failed {
            warn!("📬️ Giving up on #{} after {} failed attempts: {error}", event.id, updated.retry_count);
            Ok(Outcome::Failed)
        } else {
            info!("📬️ Delivery of #{} failed ({error}). Retrying at {retry_at}", event.id);
            Ok(Outcome::Retried)
        }
    }
}
