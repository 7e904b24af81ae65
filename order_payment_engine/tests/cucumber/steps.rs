use std::str::FromStr;

use cucumber::{gherkin::Step, then, when};
use opg_common::Amount;
use order_payment_engine::{
    db_types::{NewOrder, NotificationStatus, OrderStatusType, PaymentStatus, TransactionStatus},
    notification_objects::{EnqueueAction, EnqueueRequest},
    payment_objects::VerificationRequest,
    AuthContext,
    NotificationManagement,
    OrderManagement,
    PaymentGatewayError,
    PaymentManagement,
};
use serde_json::json;

use crate::cucumber::PaymentWorld;

async fn order_reference(world: &PaymentWorld, order_number: &str) -> String {
    let id = world.order_id(order_number);
    let order = world.system().flow.fetch_order(id).await.expect("Error fetching order");
    order.payment_reference.expect("Order has no payment reference")
}

#[when(expr = "I receive order {word} for {int} with email {string}")]
async fn receive_order(world: &mut PaymentWorld, order_number: String, total: i64, email: String) {
    let order = NewOrder::new(&order_number, Amount::from(total)).with_email(email);
    let order = world.system().flow.process_new_order(order).await.expect("Error processing order");
    let order = world
        .system()
        .payments
        .assign_payment_reference(order.id, None, &AuthContext::system())
        .await
        .expect("Error assigning reference");
    world.orders.insert(order_number, order.id);
}

#[when(expr = "the gateway reports a payment of {int} for order {word}")]
async fn gateway_payment(world: &mut PaymentWorld, amount: i64, order_number: String) {
    let reference = order_reference(world, &order_number).await;
    let request = VerificationRequest::new(reference, Amount::from(amount)).with_payload(json!({"status": "success"}));
    let result = world.system().payments.verify(request, &AuthContext::gateway()).await;
    world.last_verification = Some(result);
}

#[when(expr = "the gateway reports a payment of {int} for reference {string}")]
async fn gateway_payment_for_reference(world: &mut PaymentWorld, amount: i64, reference: String) {
    let request = VerificationRequest::new(reference, Amount::from(amount));
    let result = world.system().payments.verify(request, &AuthContext::gateway()).await;
    world.last_verification = Some(result);
}

#[when(expr = "an admin moves order {word} to {word}")]
async fn admin_transition(world: &mut PaymentWorld, order_number: String, status: String) {
    let id = world.order_id(&order_number);
    let target = OrderStatusType::from_str(&status).expect("Not a valid order status");
    let result = world.system().flow.transition(id, target, &AuthContext::admin("admin")).await;
    world.last_transition = Some(result.map(|_| ()));
}

#[when(expr = "two callers enqueue {string} for order {word} to {string} with template {string}")]
async fn parallel_enqueue(world: &mut PaymentWorld, event_type: String, order_number: String, to: String, template: String) {
    let id = world.order_id(&order_number);
    let request = EnqueueRequest {
        order_id: id,
        event_type,
        recipient: Some(to),
        template_key: template,
        variables: json!({}),
    };
    let queue = world.system().flow.notifications();
    let auth = AuthContext::system();
    let (a, b) = tokio::join!(queue.enqueue(request.clone(), &auth), queue.enqueue(request, &auth));
    world.enqueue_results = vec![a.expect("Enqueue failed"), b.expect("Enqueue failed")];
}

#[when("the reconciliation sweeper runs")]
async fn run_sweeper(world: &mut PaymentWorld) {
    let report = world.system().reconciliation.run_sweep().await.expect("Sweep failed");
    world.last_sweep = Some(report);
}

#[when(expr = "order {word} is marked paid behind the engine's back")]
async fn force_paid(world: &mut PaymentWorld, order_number: String) {
    let id = world.order_id(&order_number);
    sqlx::query("UPDATE orders SET payment_status = 'paid' WHERE id = $1")
        .bind(id)
        .execute(world.system().db.pool())
        .await
        .expect("Error updating order");
}

#[then("the verification succeeds")]
async fn verification_succeeds(world: &mut PaymentWorld) {
    match world.last_verification.as_ref().expect("No verification was attempted") {
        Ok(result) => assert!(result.success),
        Err(e) => panic!("Verification failed: {e}"),
    }
}

#[then(expr = "the verification fails with {word}")]
async fn verification_fails(world: &mut PaymentWorld, kind: String) {
    let err = match world.last_verification.as_ref().expect("No verification was attempted") {
        Ok(r) => panic!("Verification unexpectedly succeeded: {r:?}"),
        Err(e) => e,
    };
    let matched = match kind.as_str() {
        "AmountMismatch" => matches!(err, PaymentGatewayError::AmountMismatch { .. }),
        "OrderNotFound" => matches!(err, PaymentGatewayError::OrderNotFound(_)),
        "ValidationError" => matches!(err, PaymentGatewayError::ValidationError(_)),
        other => panic!("Unknown error kind {other}"),
    };
    assert!(matched, "Expected {kind}, got {err:?}");
}

#[then(expr = "the transition fails with InvalidTransition")]
async fn transition_fails(world: &mut PaymentWorld) {
    let result = world.last_transition.as_ref().expect("No transition was attempted");
    assert!(matches!(result, Err(PaymentGatewayError::InvalidTransition { .. })), "{result:?}");
}

#[then("the transition succeeds")]
async fn transition_succeeds(world: &mut PaymentWorld) {
    let result = world.last_transition.as_ref().expect("No transition was attempted");
    assert!(result.is_ok(), "{result:?}");
}

#[then(expr = "order {word} is {word} with payment {word}")]
async fn check_order_state(world: &mut PaymentWorld, order_number: String, status: String, payment: String) {
    let id = world.order_id(&order_number);
    let order = world.system().flow.fetch_order(id).await.expect("Error fetching order");
    assert_eq!(order.status, OrderStatusType::from_str(&status).expect("Not a valid status"));
    assert_eq!(order.payment_status, PaymentStatus::from_str(&payment).expect("Not a valid payment status"));
}

#[then(expr = "order {word} has {int} completed transaction(s)")]
async fn check_completed_transactions(world: &mut PaymentWorld, order_number: String, count: usize) {
    let id = world.order_id(&order_number);
    let txns = world.system().db.fetch_transactions_for_order(id).await.expect("Error fetching transactions");
    assert_eq!(txns.iter().filter(|t| t.status == TransactionStatus::Completed).count(), count);
}

#[then(expr = "order {word} has {int} security incident(s)")]
async fn check_incidents(world: &mut PaymentWorld, order_number: String, count: usize) {
    let id = world.order_id(&order_number);
    let incidents = world.system().db.fetch_incidents_for_order(id).await.expect("Error fetching incidents");
    assert_eq!(incidents.len(), count);
}

#[then(expr = "order {word} has {int} status change(s) in its history")]
async fn check_history(world: &mut PaymentWorld, order_number: String, count: usize) {
    let id = world.order_id(&order_number);
    let history = world.system().db.fetch_status_history(id).await.expect("Error fetching history");
    assert_eq!(history.len(), count);
}

#[then(expr = "the queued notifications for order {word} are:")]
async fn check_notifications(world: &mut PaymentWorld, step: &Step, order_number: String) {
    let id = world.order_id(&order_number);
    let events = world.system().db.fetch_notifications_for_order(id).await.expect("Error fetching notifications");
    let mut actual = events
        .iter()
        .filter(|e| e.status == NotificationStatus::Queued)
        .map(|e| (e.template_key.clone(), e.recipient.clone()))
        .collect::<Vec<_>>();
    actual.sort();
    let table = step.table.as_ref().expect("Expected a table of notifications");
    let mut expected =
        table.rows.iter().skip(1).map(|row| (row[0].clone(), row[1].clone())).collect::<Vec<(String, String)>>();
    expected.sort();
    assert_eq!(actual, expected);
}

#[then("one enqueue created the event and the other was deduplicated onto it")]
async fn check_dedup(world: &mut PaymentWorld) {
    let results = &world.enqueue_results;
    assert_eq!(results.len(), 2);
    let created = results.iter().filter(|r| r.action == EnqueueAction::Created).count();
    let deduped = results.iter().filter(|r| r.action == EnqueueAction::Deduplicated).count();
    assert_eq!((created, deduped), (1, 1));
    assert_eq!(results[0].event_id, results[1].event_id);
}

#[then(expr = "the sweep made {int} correction(s)")]
async fn check_sweep(world: &mut PaymentWorld, count: usize) {
    let report = world.last_sweep.as_ref().expect("The sweeper has not run");
    assert_eq!(report.total_corrections(), count, "{report:?}");
}
