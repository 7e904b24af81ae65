use serde::{Deserialize, Serialize};

use crate::db_types::{
    NotificationEvent,
    Order,
    OrderStatusType,
    PaymentTransaction,
    SecurityIncident,
    StatusHistoryEntry,
};

/// Everything an admin needs to understand the state of one order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetails {
    pub order: Order,
    pub history: Vec<StatusHistoryEntry>,
    pub transactions: Vec<PaymentTransaction>,
    pub incidents: Vec<SecurityIncident>,
    pub notifications: Vec<NotificationEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransitionMode {
    /// Forward moves and side branches only.
    Regular,
    /// Any move. Admin only, and a reason is mandatory.
    Correction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub status: OrderStatusType,
    #[serde(default)]
    pub reason: Option<String>,
}
