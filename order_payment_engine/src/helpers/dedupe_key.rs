//! Deterministic idempotency keys.
//!
//! A key is a readable `subject_type:subject_id:action` prefix followed by the first 16 bytes of a Blake2b hash of
//! the discriminating input (recipient, template, reference...). Equal inputs always give equal keys, so the key can
//! be recomputed by any process that retries the same action.
use std::fmt::Display;

use blake2::{Blake2b512, Digest};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupeKey {
    key: String,
    subject_type: String,
    subject_id: String,
    action: String,
}

impl DedupeKey {
    pub fn derive(subject_type: &str, subject_id: &str, action: &str, discriminator: &str) -> Self {
        let digest = Blake2b512::new()
            .chain_update(subject_type.as_bytes())
            .chain_update([0u8])
            .chain_update(subject_id.as_bytes())
            .chain_update([0u8])
            .chain_update(action.as_bytes())
            .chain_update([0u8])
            .chain_update(discriminator.as_bytes())
            .finalize();
        let hash = digest[..16].iter().map(|b| format!("{b:02x}")).collect::<String>();
        let key = format!("{subject_type}:{subject_id}:{action}:{hash}");
        Self {
            key,
            subject_type: subject_type.to_string(),
            subject_id: subject_id.to_string(),
            action: action.to_string(),
        }
    }

    /// The key guarding a notification. Recipients compare case-insensitively.
    pub fn for_notification(event_type: &str, order_id: Option<i64>, recipient: &str, template_key: &str) -> Self {
        let subject_id = order_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string());
        let discriminator = format!("{}|{template_key}", recipient.trim().to_lowercase());
        Self::derive("order", &subject_id, event_type, &discriminator)
    }

    /// The key guarding the single "order paid" mutation for an order.
    pub fn for_payment_confirmation(order_id: i64, reference: &str) -> Self {
        Self::derive("order", &order_id.to_string(), "payment_confirmed", reference)
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn subject_type(&self) -> &str {
        &self.subject_type
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn action(&self) -> &str {
        &self.action
    }
}

impl Display for DedupeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn deterministic() {
        let a = DedupeKey::for_notification("order_status_update", Some(42), "Alice@Example.com", "order_confirmed");
        let b = DedupeKey::for_notification("order_status_update", Some(42), " alice@example.com", "order_confirmed");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("order:42:order_status_update:"));
        assert_eq!(a.as_str().len(), "order:42:order_status_update:".len() + 32);
        let hash = a.as_str().rsplit(':').next().unwrap();
        assert!(hash.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)), "{hash}");
    }

    #[test]
    fn inputs_discriminate() {
        let base = DedupeKey::for_notification("order_status_update", Some(42), "a@x.com", "order_confirmed");
        let other_template = DedupeKey::for_notification("order_status_update", Some(42), "a@x.com", "order_ready");
        let other_order = DedupeKey::for_notification("order_status_update", Some(43), "a@x.com", "order_confirmed");
        let other_recipient = DedupeKey::for_notification("order_status_update", Some(42), "b@x.com", "order_confirmed");
        assert_ne!(base, other_template);
        assert_ne!(base, other_order);
        assert_ne!(base, other_recipient);
        assert_ne!(DedupeKey::for_payment_confirmation(1, "txn_a"), DedupeKey::for_payment_confirmation(1, "txn_b"));
    }
}
