use actix_web::{
    body::to_bytes,
    http::StatusCode,
    test,
    test::TestRequest,
    web,
    App,
};
use log::debug;
use opg_common::{Amount, Secret};
use order_payment_engine::{
    db_types::{NewOrder, Order},
    events::EventProducers,
    test_utils::prepare_env::{prepare_test_env, random_db_path, remove_database},
    AuthContext,
    EngineConfig,
    OrderFlowApi,
    PaymentApi,
    PaymentGatewayDatabase,
    ReconciliationApi,
    SqliteDatabase,
    SuppressionApi,
};
use serde_json::Value;

use crate::{
    auth::{AdminKey, ACTOR_HEADER, ADMIN_KEY_HEADER},
    config::{GatewayConfig, ServerOptions},
    helpers::calculate_hmac,
    middleware::GATEWAY_HMAC_HEADER,
    server::configure_routes,
};

// DO NOT re-use these anywhere.
pub const ADMIN_KEY: &str = "test-admin-key-0123456789";
pub const HMAC_SECRET: &str = "test-gateway-hmac-secret";

pub struct TestBackend {
    pub db: SqliteDatabase,
    pub flow: OrderFlowApi<SqliteDatabase>,
    pub payments: PaymentApi<SqliteDatabase>,
}

impl TestBackend {
    pub async fn new() -> Self {
        let db = prepare_test_env(&random_db_path()).await;
        let flow = OrderFlowApi::new(db.clone(), EventProducers::default(), EngineConfig::default());
        let payments = PaymentApi::new(flow.clone());
        Self { db, flow, payments }
    }

    /// Creates an order for 5000 with a customer email and a payment reference. Returns the order and its reference.
    pub async fn order_with_reference(&self, number: &str) -> (Order, String) {
        let order = NewOrder::new(number, Amount::from(5000)).with_email("alice@example.com");
        let order = self.flow.process_new_order(order).await.expect("Error creating order");
        let order = self
            .payments
            .assign_payment_reference(order.id, None, &AuthContext::system())
            .await
            .expect("Error assigning reference");
        let reference = order.payment_reference.clone().expect("No reference");
        (order, reference)
    }

    pub async fn tear_down(mut self) {
        let url = self.db.url().to_string();
        let _ = self.db.close().await;
        drop(self);
        remove_database(&url).await;
    }
}

/// Sends the request through the full set of routes and returns the status and body.
pub async fn send(backend: &TestBackend, req: TestRequest) -> (StatusCode, String) {
    let gateway = GatewayConfig { hmac_secret: Secret::new(HMAC_SECRET.to_string()), hmac_checks: true };
    let app = App::new()
        .app_data(web::Data::new(backend.flow.clone()))
        .app_data(web::Data::new(backend.payments.clone()))
        .app_data(web::Data::new(ReconciliationApi::new(backend.flow.clone())))
        .app_data(web::Data::new(SuppressionApi::new(backend.db.clone(), EngineConfig::default())))
        .app_data(web::Data::new(ServerOptions::default()))
        .app_data(web::Data::new(AdminKey::new(Secret::new(ADMIN_KEY.to_string()))))
        .configure(|cfg| configure_routes(cfg, &gateway));
    let service = test::init_service(app).await;
    debug!("Making request");
    match test::try_call_service(&service, req.to_request()).await {
        Ok(res) => {
            let status = res.status();
            let body = test::read_body(res).await;
            (status, String::from_utf8_lossy(&body).into_owned())
        },
        Err(e) => {
            let res = e.error_response();
            let status = res.status();
            let body = to_bytes(res.into_body()).await.unwrap_or_default();
            (status, String::from_utf8_lossy(&body).into_owned())
        },
    }
}

pub fn admin_request(req: TestRequest) -> TestRequest {
    req.insert_header((ADMIN_KEY_HEADER, ADMIN_KEY)).insert_header((ACTOR_HEADER, "ops"))
}

pub fn signed_webhook(body: &str) -> TestRequest {
    TestRequest::post()
        .uri("/gateway/webhook")
        .insert_header(("content-type", "application/json"))
        .insert_header((GATEWAY_HMAC_HEADER, calculate_hmac(HMAC_SECRET, body.as_bytes())))
        .set_payload(body.to_string())
}

pub fn json(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|e| panic!("Response is not JSON ({e}): {body}"))
}
