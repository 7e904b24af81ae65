use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ORDER_STATUS_UPDATE: &str = "order_status_update";
pub const PAYMENT_CONFIRMATION: &str = "payment_confirmation";
pub const PAYMENT_RECEIVED_TEMPLATE: &str = "payment_received";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub order_id: i64,
    pub event_type: String,
    #[serde(default)]
    pub recipient: Option<String>,
    pub template_key: String,
    #[serde(default)]
    pub variables: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueAction {
    Created,
    Deduplicated,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueResult {
    pub action: EnqueueAction,
    pub event_id: Option<i64>,
    /// Why nothing was queued, for skipped requests.
    pub reason: Option<String>,
}

impl EnqueueResult {
    pub fn created(event_id: i64) -> Self {
        Self { action: EnqueueAction::Created, event_id: Some(event_id), reason: None }
    }

    pub fn deduplicated(event_id: i64) -> Self {
        Self { action: EnqueueAction::Deduplicated, event_id: Some(event_id), reason: None }
    }

    pub fn skipped<S: Into<String>>(reason: S) -> Self {
        Self { action: EnqueueAction::Skipped, event_id: None, reason: Some(reason.into()) }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub claimed: usize,
    pub sent: usize,
    /// Deliveries that failed and were put back in the queue.
    pub retried: usize,
    /// Deliveries that failed for the last time.
    pub failed: usize,
    /// Events pushed back to the end of the recipient's rate-limit window.
    pub deferred: usize,
    pub suppressed: usize,
}
