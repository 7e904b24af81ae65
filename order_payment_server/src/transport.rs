use log::*;
use order_payment_engine::{
    traits::{OutboundMessage, TransportError},
    NotificationTransport,
};

/// A transport that writes notifications to the log instead of sending them.
///
/// This is what the server uses until a real mail or SMS provider is wired in. Deliveries always succeed, so the
/// whole queue lifecycle can be exercised in development.
#[derive(Debug, Clone, Default)]
pub struct LogTransport;

impl NotificationTransport for LogTransport {
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        if message.recipient.trim().is_empty() {
            return Err(TransportError::DeliveryFailed(format!("Notification #{} has no recipient", message.event_id)));
        }
        info!(
            target: "opg::outbox",
            "📬️ [#{}] To: {} | {} | {}",
            message.event_id,
            message.recipient,
            message.subject,
            message.body.replace('\n', " / ")
        );
        Ok(())
    }
}
