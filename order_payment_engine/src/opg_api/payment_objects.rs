use opg_common::Amount;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db_types::{Order, OrderStatusType, PaymentStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub reference: String,
    pub amount: Amount,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub raw_payload: Value,
}

impl VerificationRequest {
    pub fn new<S: Into<String>>(reference: S, amount: Amount) -> Self {
        Self { reference: reference.into(), amount, currency: None, raw_payload: Value::Null }
    }

    pub fn with_currency<S: Into<String>>(mut self, currency: S) -> Self {
        self.currency = Some(currency.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.raw_payload = payload;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub success: bool,
    pub order_id: i64,
    pub order_number: String,
    pub status: OrderStatusType,
    pub payment_status: PaymentStatus,
    pub reference: String,
    /// True when this call found the order already paid and changed nothing.
    pub already_verified: bool,
}

impl VerificationResult {
    pub(crate) fn from_order(order: &Order, reference: &str, already_verified: bool) -> Self {
        Self {
            success: order.is_paid(),
            order_id: order.id,
            order_number: order.order_number.clone(),
            status: order.status,
            payment_status: order.payment_status,
            reference: reference.to_string(),
            already_verified,
        }
    }
}

/// What a customer polling for their payment gets to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStatusView {
    pub reference: String,
    pub order_number: String,
    pub status: OrderStatusType,
    pub payment_status: PaymentStatus,
    pub amount_due: Amount,
    pub currency: String,
}

impl From<&Order> for PaymentStatusView {
    fn from(order: &Order) -> Self {
        Self {
            reference: order.payment_reference.clone().unwrap_or_default(),
            order_number: order.order_number.clone(),
            status: order.status,
            payment_status: order.payment_status,
            amount_due: order.expected_payment(),
            currency: order.currency.clone(),
        }
    }
}
