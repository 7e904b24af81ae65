use chrono::{Duration, Utc};
use mockall::{mock, predicate::*};
use order_payment_engine::{
    db_types::{NotificationStatus, SuppressionReason},
    notification_objects::{EnqueueRequest, ORDER_STATUS_UPDATE},
    traits::{NotificationTransport, OutboundMessage, PlainTextRenderer, TransportError},
    AuthContext,
    EngineConfig,
    NotificationDispatcher,
    NotificationManagement,
    SqliteDatabase,
    SuppressionApi,
};
use serde_json::{json, Value};

mod support;

use support::{setup, tear_down, TestSystem};

mock! {
    pub Transport {}
    impl NotificationTransport for Transport {
        async fn deliver(&self, message: &OutboundMessage) -> Result<(), TransportError>;
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig { notification_backoff: Duration::zero(), ..EngineConfig::default() }
}

fn dispatcher(
    system: &TestSystem,
    transport: MockTransport,
    config: EngineConfig,
) -> NotificationDispatcher<SqliteDatabase, MockTransport, PlainTextRenderer> {
    NotificationDispatcher::new(system.db.clone(), transport, PlainTextRenderer, config)
}

async fn enqueue(system: &TestSystem, order_id: i64, recipient: &str, template: &str, variables: Value) -> i64 {
    let request = EnqueueRequest {
        order_id,
        event_type: ORDER_STATUS_UPDATE.into(),
        recipient: Some(recipient.into()),
        template_key: template.into(),
        variables,
    };
    let result = system.flow.notifications().enqueue(request, &AuthContext::system()).await.expect("Enqueue failed");
    result.event_id.expect("Nothing was queued")
}

#[tokio::test]
async fn due_events_are_rendered_and_sent() {
    let system = setup().await;
    let order = system.order_with_reference("O1", 5000).await;
    let id = enqueue(&system, order.id, "a@b.com", "order_confirmed", json!({"order_number": "O1"})).await;
    let mut transport = MockTransport::new();
    transport
        .expect_deliver()
        .withf(move |m| {
            m.event_id == id && m.recipient == "a@b.com" && m.subject == "Order confirmed" && m.body == "order_number: O1"
        })
        .times(1)
        .returning(|_| Ok(()));
    let dispatcher = dispatcher(&system, transport, fast_config());
    let report = dispatcher.dispatch_once().await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.sent, 1);
    let event = system.db.fetch_notification(id).await.unwrap().unwrap();
    assert_eq!(event.status, NotificationStatus::Sent);
    assert!(event.sent_at.is_some());
    // Nothing left to do
    let report = dispatcher.dispatch_once().await.unwrap();
    assert_eq!(report.claimed, 0);
    tear_down(system).await;
}

#[tokio::test]
async fn failed_deliveries_are_retried_then_failed() {
    let system = setup().await;
    let order = system.order_with_reference("O1", 5000).await;
    let id = enqueue(&system, order.id, "a@b.com", "order_confirmed", json!({})).await;
    let mut transport = MockTransport::new();
    transport.expect_deliver().times(3).returning(|_| Err(TransportError::DeliveryFailed("mailbox full".into())));
    let dispatcher = dispatcher(&system, transport, fast_config());

    for attempt in 1..=2 {
        let report = dispatcher.dispatch_once().await.unwrap();
        assert_eq!(report.retried, 1, "attempt {attempt}");
        let event = system.db.fetch_notification(id).await.unwrap().unwrap();
        assert_eq!(event.status, NotificationStatus::Queued);
        assert_eq!(event.retry_count, attempt);
    }
    let report = dispatcher.dispatch_once().await.unwrap();
    assert_eq!(report.failed, 1);
    let event = system.db.fetch_notification(id).await.unwrap().unwrap();
    assert_eq!(event.status, NotificationStatus::Failed);
    assert_eq!(event.retry_count, 3);
    assert!(event.last_error.unwrap().contains("mailbox full"));
    // Failed events are not picked up again
    let report = dispatcher.dispatch_once().await.unwrap();
    assert_eq!(report.claimed, 0);
    tear_down(system).await;
}

#[tokio::test]
async fn retries_back_off() {
    let system = setup().await;
    let order = system.order_with_reference("O1", 5000).await;
    let id = enqueue(&system, order.id, "a@b.com", "order_confirmed", json!({})).await;
    let mut transport = MockTransport::new();
    transport.expect_deliver().times(1).returning(|_| Err(TransportError::DeliveryFailed("timeout".into())));
    let dispatcher = dispatcher(&system, transport, EngineConfig::default());
    let before = Utc::now();
    let report = dispatcher.dispatch_once().await.unwrap();
    assert_eq!(report.retried, 1);
    let event = system.db.fetch_notification(id).await.unwrap().unwrap();
    assert!(event.scheduled_at >= before + Duration::minutes(1));
    // Not due yet, so the transport is not called again
    let report = dispatcher.dispatch_once().await.unwrap();
    assert_eq!(report.claimed, 0);
    tear_down(system).await;
}

#[tokio::test]
async fn recipients_suppressed_after_queueing_are_not_contacted() {
    let system = setup().await;
    let order = system.order_with_reference("O1", 5000).await;
    let id = enqueue(&system, order.id, "a@b.com", "order_confirmed", json!({})).await;
    let suppressions = SuppressionApi::new(system.db.clone(), EngineConfig::default());
    suppressions.suppress("a@b.com", SuppressionReason::Complaint, &AuthContext::system()).await.unwrap();
    let mut transport = MockTransport::new();
    transport.expect_deliver().never();
    let dispatcher = dispatcher(&system, transport, fast_config());
    let report = dispatcher.dispatch_once().await.unwrap();
    assert_eq!(report.suppressed, 1);
    let event = system.db.fetch_notification(id).await.unwrap().unwrap();
    assert_eq!(event.status, NotificationStatus::Failed);
    assert_eq!(event.last_error.as_deref(), Some("suppressed: complaint"));
    tear_down(system).await;
}

#[tokio::test]
async fn rate_limited_recipients_are_deferred() {
    let system = setup().await;
    let order = system.order_with_reference("O1", 5000).await;
    let first = enqueue(&system, order.id, "a@b.com", "order_confirmed", json!({})).await;
    let second = enqueue(&system, order.id, "a@b.com", "order_preparing", json!({})).await;
    let mut transport = MockTransport::new();
    transport.expect_deliver().with(function(move |m: &OutboundMessage| m.event_id == first)).times(1).returning(|_| Ok(()));
    let config = EngineConfig { rate_limit_max: 1, ..fast_config() };
    let dispatcher = dispatcher(&system, transport, config);
    let report = dispatcher.dispatch_once().await.unwrap();
    assert_eq!(report.claimed, 2);
    assert_eq!(report.sent, 1);
    assert_eq!(report.deferred, 1);
    let deferred = system.db.fetch_notification(second).await.unwrap().unwrap();
    assert_eq!(deferred.status, NotificationStatus::Queued);
    assert_eq!(deferred.retry_count, 0, "Deferral must not use up a retry");
    assert!(deferred.scheduled_at > Utc::now());
    tear_down(system).await;
}

#[tokio::test]
async fn unrenderable_events_fail_without_retries() {
    let system = setup().await;
    let order = system.order_with_reference("O1", 5000).await;
    let id = enqueue(&system, order.id, "a@b.com", "order_confirmed", json!(["not", "an", "object"])).await;
    let mut transport = MockTransport::new();
    transport.expect_deliver().never();
    let dispatcher = dispatcher(&system, transport, fast_config());
    let report = dispatcher.dispatch_once().await.unwrap();
    assert_eq!(report.failed, 1);
    let event = system.db.fetch_notification(id).await.unwrap().unwrap();
    assert_eq!(event.status, NotificationStatus::Failed);
    assert_eq!(event.retry_count, 0);
    tear_down(system).await;
}
