use cucumber::given;

use crate::cucumber::{payment_world::OrderPaymentSystem, PaymentWorld};

#[given("a fresh install")]
async fn fresh_database(world: &mut PaymentWorld) {
    let system = OrderPaymentSystem::new().await;
    world.system = Some(system);
}
