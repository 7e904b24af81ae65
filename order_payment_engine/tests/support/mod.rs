#![allow(dead_code)]
use log::*;
use opg_common::Amount;
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
};

pub struct TestSystem {
    pub db: SqliteDatabase,
    pub flow: OrderFlowApi<SqliteDatabase>,
    pub payments: PaymentApi<SqliteDatabase>,
    pub reconciliation: ReconciliationApi<SqliteDatabase>,
}

pub async fn setup() -> TestSystem {
    setup_with(EventProducers::default(), EngineConfig::default()).await
}

pub async fn setup_with(producers: EventProducers, config: EngineConfig) -> TestSystem {
    let url = random_db_path();
    let db = prepare_test_env(&url).await;
    let flow = OrderFlowApi::new(db.clone(), producers, config);
    let payments = PaymentApi::new(flow.clone());
    let reconciliation = ReconciliationApi::new(flow.clone());
    TestSystem { db, flow, payments, reconciliation }
}

pub async fn tear_down(mut system: TestSystem) {
    let url = system.db.url().to_string();
    if let Err(e) = system.db.close().await {
        error!("🚀️ Failed to close database: {e}");
    }
    drop(system);
    remove_database(&url).await;
}

impl TestSystem {
    /// Creates an order with a customer email and assigns it a payment reference.
    pub async fn order_with_reference(&self, number: &str, total: i64) -> Order {
        let order = NewOrder::new(number, Amount::from(total)).with_customer("cust-1", Some("alice@example.com".into()));
        let order = self.flow.process_new_order(order).await.expect("Error creating order");
        self.payments
            .assign_payment_reference(order.id, None, &AuthContext::system())
            .await
            .expect("Error assigning reference")
    }
}

pub fn reference_of(order: &Order) -> String {
    order.payment_reference.clone().expect("Order has no payment reference")
}
