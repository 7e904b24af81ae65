use std::collections::HashMap;

use cucumber::World;
use log::*;
use order_payment_engine::{
    events::EventProducers,
    notification_objects::EnqueueResult,
    payment_objects::VerificationResult,
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    EngineConfig,
    OrderFlowApi,
    PaymentApi,
    PaymentGatewayError,
    ReconciliationApi,
    SqliteDatabase,
    SweepReport,
};

#[derive(Default, Debug, World)]
pub struct PaymentWorld {
    pub system: Option<OrderPaymentSystem>,
    /// Order ids by order number
    pub orders: HashMap<String, i64>,
    pub last_verification: Option<Result<VerificationResult, PaymentGatewayError>>,
    pub last_transition: Option<Result<(), PaymentGatewayError>>,
    pub enqueue_results: Vec<EnqueueResult>,
    pub last_sweep: Option<SweepReport>,
}

pub struct OrderPaymentSystem {
    pub db_path: String,
    pub db: SqliteDatabase,
    pub flow: OrderFlowApi<SqliteDatabase>,
    pub payments: PaymentApi<SqliteDatabase>,
    pub reconciliation: ReconciliationApi<SqliteDatabase>,
}

impl std::fmt::Debug for OrderPaymentSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderPaymentSystem({})", self.db_path)
    }
}

impl PaymentWorld {
    pub fn system(&self) -> &OrderPaymentSystem {
        self.system.as_ref().expect("System not initialised")
    }

    pub fn order_id(&self, order_number: &str) -> i64 {
        *self.orders.get(order_number).unwrap_or_else(|| panic!("Unknown order {order_number}"))
    }
}

impl OrderPaymentSystem {
    pub async fn new() -> Self {
        let url = random_db_path();
        let db = prepare_test_env(&url).await;
        debug!("Created database: {url}");
        let flow = OrderFlowApi::new(db.clone(), EventProducers::default(), EngineConfig::default());
        let payments = PaymentApi::new(flow.clone());
        let reconciliation = ReconciliationApi::new(flow.clone());
        Self { db_path: url, db, flow, payments, reconciliation }
    }
}
