//! # Payment verification
//!
//! `PaymentApi` is the only component that marks orders as paid. Verification runs in three phases:
//!
//! 1. Checks that need no lock: the reference must have the backend shape and must belong to an order.
//! 2. Under the order lock, the order is re-read. An order that is already paid short-circuits to the stored result.
//!    Otherwise the claimed amount is compared against `total + delivery fee`. A mismatch beyond the configured
//!    tolerance is a hard stop: an incident is written, an `AmountMismatch` event is published and the caller gets
//!    `AmountMismatch`.
//! 3. The transaction record is upserted and the order is confirmed and marked paid in one atomic mutation that also
//!    completes the transaction. The mutation carries a payment-confirmation dedupe key, so even a second process that
//!    slips past the lock cannot mark the order paid twice.
//!
//! The post-commit hook (notifications and events) runs after the lock is released.
use std::fmt::Debug;

use chrono::Utc;
use log::*;
use opg_common::Amount;

use crate::{
    db_types::{
        IncidentKind,
        NewPaymentTransaction,
        NewSecurityIncident,
        Order,
        OrderStatusType,
        PaymentStatus,
        PaymentTransaction,
        SecurityIncident,
    },
    events::AmountMismatchEvent,
    helpers::{with_retries, DedupeKey, PaymentReference},
    opg_api::{
        auth_context::{AuthContext, Role},
        order_flow_api::OrderFlowApi,
        payment_objects::{PaymentStatusView, VerificationRequest, VerificationResult},
    },
    traits::{OrderMutation, PaymentGatewayDatabase, PaymentGatewayError},
};

// A freshly generated reference colliding with an existing one is astronomically unlikely, but a client proposal
// colliding is not.
const MAX_REFERENCE_ATTEMPTS: usize = 3;

pub struct PaymentApi<B> {
    flow: OrderFlowApi<B>,
}

impl<B: Clone> Clone for PaymentApi<B> {
    fn clone(&self) -> Self {
        Self { flow: self.flow.clone() }
    }
}

impl<B> Debug for PaymentApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentApi")
    }
}

impl<B> PaymentApi<B> {
    pub fn new(flow: OrderFlowApi<B>) -> Self {
        Self { flow }
    }

    pub fn flow(&self) -> &OrderFlowApi<B> {
        &self.flow
    }
}

impl<B> PaymentApi<B>
where B: PaymentGatewayDatabase
{
    /// Gives the order a payment reference, or returns the one it already has.
    ///
    /// A client may propose a reference. It is kept only if it has the backend shape and no other order uses it.
    /// Malformed proposals are recorded as `untrusted_reference` incidents and replaced.
    pub async fn assign_payment_reference(
        &self,
        order_id: i64,
        proposal: Option<&str>,
        auth: &AuthContext,
    ) -> Result<Order, PaymentGatewayError> {
        auth.require_any(&[Role::Admin, Role::System])?;
        let config = self.flow.config();
        let label = format!("Reference assignment for order #{order_id}");
        with_retries(&label, config.retry_attempts, config.retry_backoff, || {
            self.assign_reference_once(order_id, proposal, &auth.actor_id)
        })
        .await
    }

    async fn assign_reference_once(
        &self,
        order_id: i64,
        proposal: Option<&str>,
        actor_id: &str,
    ) -> Result<Order, PaymentGatewayError> {
        let _guard = self.flow.lock_order(order_id).await?;
        let mut order = self.flow.fetch_order(order_id).await?;
        if order.payment_reference.is_some() {
            return Ok(order);
        }
        let (mut reference, rejected) = PaymentReference::from_client_proposal(proposal);
        if rejected {
            let proposed = proposal.unwrap_or_default();
            warn!("💰️ {actor_id} proposed the malformed reference '{proposed}' for order #{order_id}. Replaced by {reference}.");
            let incident = NewSecurityIncident {
                kind: IncidentKind::UntrustedReference,
                order_id: Some(order_id),
                reference: Some(proposed.to_string()),
                expected_amount: None,
                claimed_amount: None,
                details: format!("Client reference rewritten to {reference}"),
            };
            self.flow.db().insert_incident(incident).await?;
        }
        for _ in 0..MAX_REFERENCE_ATTEMPTS {
            if let Some(other) = self.flow.db().fetch_order_by_reference(reference.as_str()).await? {
                warn!("💰️ Reference {reference} already belongs to order #{}. Generating a new one.", other.id);
                reference = PaymentReference::generate();
                continue;
            }
            match self.flow.db().assign_payment_reference(order.id, order.version, reference.as_str()).await {
                Ok(updated) => {
                    info!("💰️ Order #{order_id} has payment reference {reference}");
                    return Ok(updated);
                },
                Err(PaymentGatewayError::Conflict(msg)) => {
                    debug!("💰️ Reference assignment for order #{order_id} conflicted: {msg}");
                    order = self.flow.fetch_order(order_id).await?;
                    if order.payment_reference.is_some() {
                        return Ok(order);
                    }
                    reference = PaymentReference::generate();
                },
                Err(e) => return Err(e),
            }
        }
        Err(PaymentGatewayError::Conflict(format!("Could not find a free payment reference for order #{order_id}")))
    }

    /// The verification entry point. Safe to call any number of times with the same arguments.
    pub async fn verify(
        &self,
        request: VerificationRequest,
        auth: &AuthContext,
    ) -> Result<VerificationResult, PaymentGatewayError> {
        auth.require_any(&[Role::Gateway, Role::Customer, Role::System])?;
        let reference = request.reference.trim();
        if reference.is_empty() {
            return Err(PaymentGatewayError::ValidationError("A payment reference is required".into()));
        }
        let reference = reference
            .parse::<PaymentReference>()
            .map_err(|e| PaymentGatewayError::ValidationError(e.to_string()))?;
        if request.amount.is_negative() {
            return Err(PaymentGatewayError::ValidationError("The claimed amount cannot be negative".into()));
        }
        let order = self
            .flow
            .db()
            .fetch_order_by_reference(reference.as_str())
            .await?
            .ok_or_else(|| PaymentGatewayError::OrderNotFound(format!("with reference {reference}")))?;
        let config = self.flow.config();
        let label = format!("Verification of {reference}");
        with_retries(&label, config.retry_attempts, config.retry_backoff, || {
            self.verify_once(order.id, &reference, &request, &auth.actor_id)
        })
        .await
    }

    async fn verify_once(
        &self,
        order_id: i64,
        reference: &PaymentReference,
        request: &VerificationRequest,
        actor_id: &str,
    ) -> Result<VerificationResult, PaymentGatewayError> {
        let reference = reference.as_str();
        let guard = self.flow.lock_order(order_id).await?;
        let order = self.flow.fetch_order(order_id).await?;
        if order.payment_reference.as_deref() != Some(reference) {
            return Err(PaymentGatewayError::OrderNotFound(format!("with reference {reference}")));
        }
        if order.is_paid() {
            debug!("💰️ Order #{order_id} is already paid. Verification of {reference} is a no-op.");
            return Ok(VerificationResult::from_order(&order, reference, true));
        }
        self.check_amount(&order, reference, request).await?;
        let txn = NewPaymentTransaction {
            reference: reference.to_string(),
            order_id,
            amount: request.amount,
            currency: order.currency.clone(),
            raw_payload: request.raw_payload.clone(),
        };
        let txn = self.flow.db().upsert_transaction(txn).await?;
        if order.status.is_terminal() {
            warn!("💰️ A valid payment {reference} arrived for order #{order_id}, but the order is {}.", order.status);
            return Err(PaymentGatewayError::InvalidTransition { from: order.status, to: OrderStatusType::Confirmed });
        }
        let target = match order.status {
            OrderStatusType::Pending => OrderStatusType::Confirmed,
            current => current,
        };
        let mutation = OrderMutation::new(&order, target, PaymentStatus::Paid, actor_id)
            .with_reason(Some(format!("Payment {reference} verified")))
            .completing_transaction(txn.id)
            .guarded_by(DedupeKey::for_payment_confirmation(order_id, reference));
        let result = match self.flow.db().apply_order_mutation(mutation).await {
            Ok(result) => result,
            Err(PaymentGatewayError::DuplicateAction(key)) => {
                info!("💰️ Payment for order #{order_id} was already confirmed elsewhere ({key}).");
                let order = self.flow.fetch_order(order_id).await?;
                return Ok(VerificationResult::from_order(&order, reference, true));
            },
            Err(e) => return Err(e),
        };
        drop(guard);
        info!("💰️ Payment {reference} verified. Order #{order_id} is paid and {}.", result.order.status);
        self.flow.after_commit(&result).await;
        Ok(VerificationResult::from_order(&result.order, reference, false))
    }

    async fn check_amount(
        &self,
        order: &Order,
        reference: &str,
        request: &VerificationRequest,
    ) -> Result<(), PaymentGatewayError> {
        let expected = order.expected_payment();
        let claimed = request.amount;
        let currency_ok =
            request.currency.as_deref().map(|c| c.trim().eq_ignore_ascii_case(&order.currency)).unwrap_or(true);
        let tolerance = self.flow.config().amount_tolerance;
        if currency_ok && expected.abs_diff(claimed) <= tolerance {
            return Ok(());
        }
        let currency = request.currency.clone().unwrap_or_else(|| order.currency.clone());
        error!(
            "💰️ AMOUNT MISMATCH on order #{} ({reference}). Expected {expected} {}, got {claimed} {currency}. The \
             order stays unpaid.",
            order.id, order.currency
        );
        let incident = NewSecurityIncident {
            kind: IncidentKind::AmountMismatch,
            order_id: Some(order.id),
            reference: Some(reference.to_string()),
            expected_amount: Some(expected),
            claimed_amount: Some(claimed),
            details: format!("Expected {expected} {}, claimed {claimed} {currency}", order.currency),
        };
        self.flow.db().insert_incident(incident).await?;
        let event = AmountMismatchEvent {
            order_id: order.id,
            reference: reference.to_string(),
            expected,
            claimed,
            currency,
            timestamp: Utc::now(),
        };
        self.flow.producers().publish_amount_mismatch(event).await;
        Err(PaymentGatewayError::AmountMismatch { expected, claimed })
    }

    /// What a customer sees when polling. `pending` until a verification succeeds.
    pub async fn payment_status(&self, reference: &str) -> Result<PaymentStatusView, PaymentGatewayError> {
        let order = self
            .flow
            .db()
            .fetch_order_by_reference(reference.trim())
            .await?
            .ok_or_else(|| PaymentGatewayError::OrderNotFound(format!("with reference {reference}")))?;
        Ok(PaymentStatusView::from(&order))
    }

    pub async fn incidents_for_order(
        &self,
        order_id: i64,
        auth: &AuthContext,
    ) -> Result<Vec<SecurityIncident>, PaymentGatewayError> {
        auth.require_any(&[Role::Admin])?;
        self.flow.db().fetch_incidents_for_order(order_id).await
    }

    pub async fn transactions_for_order(&self, order_id: i64) -> Result<Vec<PaymentTransaction>, PaymentGatewayError> {
        self.flow.db().fetch_transactions_for_order(order_id).await
    }

    /// The sum the gateway must report for this order to be accepted.
    pub async fn amount_due(&self, order_id: i64) -> Result<Amount, PaymentGatewayError> {
        Ok(self.flow.fetch_order(order_id).await?.expected_payment())
    }
}
