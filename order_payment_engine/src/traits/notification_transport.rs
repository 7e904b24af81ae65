use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Template '{0}' could not be rendered: {1}")]
    RenderFailed(String, String),
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// What the dispatcher hands to the transport for a single notification event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub event_id: i64,
    pub recipient: String,
    pub template_key: String,
    pub subject: String,
    pub body: String,
    /// Lets transports that support idempotency headers suppress duplicate sends.
    pub dedupe_key: String,
}

/// Delivers rendered notifications (email, SMS, push...). Implementations report failures as errors and the
/// dispatcher takes care of retries.
#[allow(async_fn_in_trait)]
pub trait NotificationTransport {
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), TransportError>;
}

/// Turns a template key plus variables into message content.
pub trait TemplateRenderer {
    fn render(&self, template_key: &str, variables: &Value) -> Result<RenderedMessage, TransportError>;
}

/// A renderer that needs no template store. The subject is derived from the template key, and the body lists the
/// variables one per line in key order.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextRenderer;

impl TemplateRenderer for PlainTextRenderer {
    fn render(&self, template_key: &str, variables: &Value) -> Result<RenderedMessage, TransportError> {
        let key = template_key.trim();
        if key.is_empty() {
            return Err(TransportError::RenderFailed(template_key.into(), "empty template key".into()));
        }
        let mut subject = key.replace('_', " ");
        if let Some(first) = subject.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        let body = match variables {
            Value::Object(map) => {
                let mut keys = map.keys().collect::<Vec<_>>();
                keys.sort();
                keys.into_iter()
                    .map(|k| match &map[k] {
                        Value::String(s) => format!("{k}: {s}"),
                        other => format!("{k}: {other}"),
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            },
            Value::Null => String::new(),
            other => {
                return Err(TransportError::RenderFailed(key.into(), format!("variables must be an object, got {other}")))
            },
        };
        Ok(RenderedMessage { subject, body })
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn plain_text_rendering() {
        let msg = PlainTextRenderer
            .render("order_confirmed", &json!({"status": "confirmed", "order_number": "A-100", "total": 5250}))
            .unwrap();
        assert_eq!(msg.subject, "Order confirmed");
        assert_eq!(msg.body, "order_number: A-100\nstatus: confirmed\ntotal: 5250");
        assert!(PlainTextRenderer.render("x", &json!([1, 2])).is_err());
        assert!(PlainTextRenderer.render("  ", &json!({})).is_err());
    }
}
