use actix_web::{http::StatusCode, test::TestRequest};
use serde_json::json;

use super::helpers::{json, send, TestBackend};

#[actix_web::test]
async fn health_check() {
    let backend = TestBackend::new().await;
    let (status, body) = send(&backend, TestRequest::get().uri("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "👍️\n");
    backend.tear_down().await;
}

#[actix_web::test]
async fn client_verification_confirms_the_order() {
    let backend = TestBackend::new().await;
    let (order, reference) = backend.order_with_reference("A-100").await;
    let req = TestRequest::post()
        .uri("/payments/verify")
        .insert_header(("opg_customer_id", "cust-1"))
        .set_json(json!({"reference": reference, "amount": 5000, "currency": "NGN"}));
    let (status, body) = send(&backend, req).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let result = json(&body);
    assert_eq!(result["success"], true);
    assert_eq!(result["order_id"], order.id);
    assert_eq!(result["status"], "confirmed");
    assert_eq!(result["payment_status"], "paid");
    assert_eq!(result["already_verified"], false);

    // The second confirmation is a no-op
    let req = TestRequest::post().uri("/payments/verify").set_json(json!({"reference": reference, "amount": 5000}));
    let (status, body) = send(&backend, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["already_verified"], true);
    backend.tear_down().await;
}

#[actix_web::test]
async fn short_payments_are_rejected() {
    let backend = TestBackend::new().await;
    let (order, reference) = backend.order_with_reference("A-100").await;
    let req = TestRequest::post().uri("/payments/verify").set_json(json!({"reference": reference, "amount": 4000}));
    let (status, body) = send(&backend, req).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json(&body)["error"].as_str().unwrap().contains("50.00"), "{body}");
    let order = backend.flow.fetch_order(order.id).await.unwrap();
    assert!(!order.is_paid());
    backend.tear_down().await;
}

#[actix_web::test]
async fn malformed_references_are_bad_requests() {
    let backend = TestBackend::new().await;
    let req = TestRequest::post().uri("/payments/verify").set_json(json!({"reference": "ORDER-1", "amount": 5000}));
    let (status, _) = send(&backend, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let req = TestRequest::post().uri("/payments/verify").set_json(json!({"amount": 5000}));
    let (status, _) = send(&backend, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    backend.tear_down().await;
}

#[actix_web::test]
async fn payment_status_polling() {
    let backend = TestBackend::new().await;
    let (_, reference) = backend.order_with_reference("A-100").await;
    let (status, body) = send(&backend, TestRequest::get().uri(&format!("/payments/{reference}"))).await;
    assert_eq!(status, StatusCode::OK);
    let view = json(&body);
    assert_eq!(view["order_number"], "A-100");
    assert_eq!(view["payment_status"], "pending");
    assert_eq!(view["amount_due"], 5000);

    let unknown = "txn_18f2a4c3b2e0001_aB3dE5gH7jK9mN1p";
    let (status, body) = send(&backend, TestRequest::get().uri(&format!("/payments/{unknown}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "{body}");
    backend.tear_down().await;
}
