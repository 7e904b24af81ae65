use opg_common::Amount;
use order_payment_engine::{
    db_types::{NewOrder, OrderStatusType, SuppressionReason},
    payment_objects::VerificationRequest,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The payment notification the gateway posts to the webhook, and that clients post when polling.
///
/// Only the fields the verifier needs are named here. The full body is kept as the transaction's raw payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub reference: String,
    pub amount: Amount,
    #[serde(default)]
    pub currency: Option<String>,
}

impl PaymentNotification {
    pub fn into_verification_request(self, raw_payload: Value) -> VerificationRequest {
        let request = VerificationRequest::new(self.reference, self.amount).with_payload(raw_payload);
        match self.currency {
            Some(c) => request.with_currency(c),
            None => request,
        }
    }
}

/// An order handed over by the checkout. Missing optional fields take the engine defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderParams {
    pub order_number: String,
    pub total_amount: Amount,
    #[serde(default)]
    pub delivery_fee: Amount,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
}

impl From<NewOrderParams> for NewOrder {
    fn from(params: NewOrderParams) -> Self {
        let mut order = NewOrder::new(params.order_number, params.total_amount).with_delivery_fee(params.delivery_fee);
        if let Some(currency) = params.currency {
            order = order.with_currency(currency);
        }
        order.customer_id = params.customer_id;
        order.customer_email = params.customer_email;
        order
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceParams {
    /// A reference proposed by the client. It is only kept if it is well-formed and unused.
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionParams {
    pub status: OrderStatusType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionParams {
    pub status: OrderStatusType,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionParams {
    pub recipient: String,
    pub reason: SuppressionReason,
}
