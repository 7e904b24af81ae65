use actix_web::{http::StatusCode, test::TestRequest};
use opg_common::Amount;
use order_payment_engine::{
    db_types::{NewOrder, OrderStatusType},
    AuthContext,
    SuppressionManagement,
};
use serde_json::json as json_value;

use super::helpers::{admin_request, json, send, TestBackend, ADMIN_KEY};
use crate::auth::ADMIN_KEY_HEADER;

#[actix_web::test]
async fn admin_routes_need_the_key() {
    let backend = TestBackend::new().await;
    let (status, _) = send(&backend, TestRequest::get().uri("/api/orders/1")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = TestRequest::get().uri("/api/orders/1").insert_header((ADMIN_KEY_HEADER, "not-the-key"));
    let (status, _) = send(&backend, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = TestRequest::get().uri("/api/orders/1").insert_header((ADMIN_KEY_HEADER, ADMIN_KEY));
    let (status, _) = send(&backend, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    backend.tear_down().await;
}

#[actix_web::test]
async fn order_intake_is_idempotent() {
    let backend = TestBackend::new().await;
    let body = json_value!({"order_number": "B-200", "total_amount": 4500, "delivery_fee": 500, "customer_email": "bob@example.com"});
    let req = admin_request(TestRequest::post().uri("/api/orders").set_json(&body));
    let (status, res) = send(&backend, req).await;
    assert_eq!(status, StatusCode::OK, "{res}");
    let first = json(&res);
    assert_eq!(first["status"], "pending");
    assert_eq!(first["payment_status"], "pending");
    assert_eq!(first["currency"], "NGN");

    let req = admin_request(TestRequest::post().uri("/api/orders").set_json(&body));
    let (status, res) = send(&backend, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&res)["id"], first["id"]);

    let id = first["id"].as_i64().unwrap();
    let req = admin_request(TestRequest::get().uri(&format!("/api/orders/{id}")));
    let (status, res) = send(&backend, req).await;
    assert_eq!(status, StatusCode::OK);
    let details = json(&res);
    assert_eq!(details["order"]["order_number"], "B-200");
    assert!(details["transactions"].as_array().unwrap().is_empty());
    backend.tear_down().await;
}

#[actix_web::test]
async fn references_are_stable() {
    let backend = TestBackend::new().await;
    let order = backend.flow.process_new_order(NewOrder::new("C-1", Amount::from(1000))).await.unwrap();
    let uri = format!("/api/orders/{}/reference", order.id);
    let (status, res) = send(&backend, admin_request(TestRequest::post().uri(&uri))).await;
    assert_eq!(status, StatusCode::OK, "{res}");
    let reference = json(&res)["payment_reference"].as_str().unwrap().to_string();
    assert!(reference.starts_with("txn_"));

    let (status, res) = send(&backend, admin_request(TestRequest::post().uri(&uri))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&res)["payment_reference"], reference.as_str());

    let (status, _) = send(&backend, admin_request(TestRequest::post().uri("/api/orders/9999/reference"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    backend.tear_down().await;
}

#[actix_web::test]
async fn transitions_and_corrections() {
    let backend = TestBackend::new().await;
    let (order, _) = backend.order_with_reference("D-1").await;
    let uri = format!("/api/orders/{}/status", order.id);
    let req = admin_request(TestRequest::post().uri(&uri).set_json(json_value!({"status": "preparing"})));
    let (status, res) = send(&backend, req).await;
    assert_eq!(status, StatusCode::OK, "{res}");
    assert_eq!(json(&res)["status"], "preparing");
    assert_eq!(json(&res)["last_actor"], "ops");

    let req = admin_request(TestRequest::post().uri(&uri).set_json(json_value!({"status": "pending"})));
    let (status, _) = send(&backend, req).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let req = admin_request(TestRequest::post().uri(&uri).set_json(json_value!({"status": "on_the_moon"})));
    let (status, _) = send(&backend, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let uri = format!("/api/orders/{}/correction", order.id);
    let req = admin_request(TestRequest::post().uri(&uri).set_json(json_value!({"status": "pending", "reason": "  "})));
    let (status, _) = send(&backend, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body = json_value!({"status": "pending", "reason": "Kitchen picked the wrong ticket"});
    let (status, res) = send(&backend, admin_request(TestRequest::post().uri(&uri).set_json(body))).await;
    assert_eq!(status, StatusCode::OK, "{res}");
    assert_eq!(json(&res)["status"], "pending");

    let details = backend.flow.order_details(order.id).await.unwrap();
    let last = details.history.last().expect("No history");
    assert_eq!(last.new_status, OrderStatusType::Pending);
    assert_eq!(last.reason.as_deref(), Some("Kitchen picked the wrong ticket"));
    backend.tear_down().await;
}

#[actix_web::test]
async fn notification_management() {
    let backend = TestBackend::new().await;
    let (order, _) = backend.order_with_reference("E-1").await;
    let body = json_value!({
        "order_id": order.id,
        "event_type": "order_status_update",
        "template_key": "order_delayed",
        "variables": {"minutes": 20}
    });
    let (status, res) = send(&backend, admin_request(TestRequest::post().uri("/api/notifications").set_json(&body))).await;
    assert_eq!(status, StatusCode::OK, "{res}");
    let first = json(&res);
    assert_eq!(first["action"], "created");

    let (status, res) = send(&backend, admin_request(TestRequest::post().uri("/api/notifications").set_json(&body))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&res)["action"], "deduplicated");
    assert_eq!(json(&res)["event_id"], first["event_id"]);

    let uri = format!("/api/orders/{}/notifications", order.id);
    let (status, res) = send(&backend, admin_request(TestRequest::get().uri(&uri))).await;
    assert_eq!(status, StatusCode::OK);
    let events = json(&res);
    assert!(events.as_array().unwrap().iter().any(|e| e["template_key"] == "order_delayed"));

    let req = admin_request(TestRequest::post().uri("/api/notifications/9999/requeue"));
    let (status, _) = send(&backend, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    backend.tear_down().await;
}

#[actix_web::test]
async fn suppress_and_reactivate() {
    let backend = TestBackend::new().await;
    let body = json_value!({"recipient": "Carol@Example.com", "reason": "hard_bounce"});
    let (status, res) = send(&backend, admin_request(TestRequest::post().uri("/api/suppressions").set_json(body))).await;
    assert_eq!(status, StatusCode::OK, "{res}");
    assert_eq!(json(&res)["recipient"], "carol@example.com");
    assert_eq!(json(&res)["active"], true);

    let req = admin_request(TestRequest::delete().uri("/api/suppressions/carol@example.com"));
    let (status, res) = send(&backend, req).await;
    assert_eq!(status, StatusCode::OK, "{res}");
    assert_eq!(json(&res)["active"], false);
    assert_eq!(json(&res)["reactivated_by"], "ops");
    let active = backend.db.fetch_active_suppressions(&["carol@example.com".to_string()]).await.unwrap();
    assert!(active.is_empty());

    let req = admin_request(TestRequest::delete().uri("/api/suppressions/carol@example.com"));
    let (status, _) = send(&backend, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    backend.tear_down().await;
}

#[actix_web::test]
async fn incidents_and_reconciliation() {
    let backend = TestBackend::new().await;
    let (order, reference) = backend.order_with_reference("F-1").await;
    let short = order_payment_engine::payment_objects::VerificationRequest::new(reference, Amount::from(10));
    let err = backend.payments.verify(short, &AuthContext::gateway()).await.unwrap_err();
    assert!(err.to_string().contains("0.10"), "{err}");

    let uri = format!("/api/orders/{}/incidents", order.id);
    let (status, res) = send(&backend, admin_request(TestRequest::get().uri(&uri))).await;
    assert_eq!(status, StatusCode::OK, "{res}");
    assert_eq!(json(&res).as_array().unwrap().len(), 1);

    let (status, res) = send(&backend, admin_request(TestRequest::post().uri("/api/reconcile"))).await;
    assert_eq!(status, StatusCode::OK, "{res}");
    let report = json(&res);
    assert_eq!(report["backfilled_transactions"], 0);
    assert!(report["errors"].as_array().unwrap().is_empty());
    backend.tear_down().await;
}
