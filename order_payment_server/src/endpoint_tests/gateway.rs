use actix_web::{http::StatusCode, test::TestRequest};
use order_payment_engine::{db_types::OrderStatusType, PaymentManagement};

use super::helpers::{json, send, signed_webhook, TestBackend};
use crate::middleware::GATEWAY_HMAC_HEADER;

#[actix_web::test]
async fn signed_webhooks_confirm_payment() {
    let backend = TestBackend::new().await;
    let (order, reference) = backend.order_with_reference("A-100").await;
    let body = format!(r#"{{"reference":"{reference}","amount":5000,"currency":"NGN","channel":"card"}}"#);
    let (status, res) = send(&backend, signed_webhook(&body)).await;
    assert_eq!(status, StatusCode::OK, "{res}");
    assert_eq!(json(&res)["status"], "confirmed");

    let order = backend.flow.fetch_order(order.id).await.unwrap();
    assert_eq!(order.status, OrderStatusType::Confirmed);
    let txn = backend.db.fetch_completed_transaction(order.id).await.unwrap().expect("No completed transaction");
    assert_eq!(txn.raw_payload["channel"], "card");

    // Gateways redeliver. The repeat changes nothing.
    let (status, res) = send(&backend, signed_webhook(&body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&res)["already_verified"], true);
    let again = backend.flow.fetch_order(order.id).await.unwrap();
    assert_eq!(again.version, order.version);
    backend.tear_down().await;
}

#[actix_web::test]
async fn unsigned_webhooks_are_rejected() {
    let backend = TestBackend::new().await;
    let (order, reference) = backend.order_with_reference("A-100").await;
    let body = format!(r#"{{"reference":"{reference}","amount":5000}}"#);
    let req = TestRequest::post()
        .uri("/gateway/webhook")
        .insert_header(("content-type", "application/json"))
        .set_payload(body.clone());
    let (status, _) = send(&backend, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = TestRequest::post()
        .uri("/gateway/webhook")
        .insert_header(("content-type", "application/json"))
        .insert_header((GATEWAY_HMAC_HEADER, "bm90IGEgdmFsaWQgc2lnbmF0dXJl"))
        .set_payload(body);
    let (status, _) = send(&backend, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let order = backend.flow.fetch_order(order.id).await.unwrap();
    assert!(!order.is_paid());
    backend.tear_down().await;
}

#[actix_web::test]
async fn webhook_amount_mismatch_is_recorded() {
    let backend = TestBackend::new().await;
    let (order, reference) = backend.order_with_reference("A-100").await;
    let body = format!(r#"{{"reference":"{reference}","amount":100}}"#);
    let (status, _) = send(&backend, signed_webhook(&body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let incidents = backend.db.fetch_incidents_for_order(order.id).await.unwrap();
    assert_eq!(incidents.len(), 1);
    backend.tear_down().await;
}

#[actix_web::test]
async fn garbage_webhook_bodies_are_bad_requests() {
    let backend = TestBackend::new().await;
    let (status, _) = send(&backend, signed_webhook("this is not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&backend, signed_webhook(r#"{"event":"charge.success"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    backend.tear_down().await;
}
