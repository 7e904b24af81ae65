use std::{
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
        Mutex,
    },
    time::Duration,
};

use futures_util::FutureExt;
use log::*;
use opg_common::Amount;
use order_payment_engine::{
    db_types::OrderStatusType,
    events::{EventHandlers, EventHooks},
    payment_objects::VerificationRequest,
    AuthContext,
    EngineConfig,
};
use tokio::runtime::Runtime;

mod support;

use support::{reference_of, setup_with, tear_down};

#[derive(Default, Clone)]
struct HookCalled {
    called: Arc<AtomicI32>,
}

impl HookCalled {
    pub fn called(&self) {
        let _ = self.called.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> i32 {
        self.called.load(Ordering::Relaxed)
    }
}

async fn wait_for(hook: &HookCalled, expected: i32) {
    for _ in 0..100 {
        if hook.count() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[test]
fn hooks_fire_on_payment_and_transition() {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    let rt = Runtime::new().unwrap();
    let transitioned = HookCalled::default();
    let confirmed = HookCalled::default();
    let mismatched = HookCalled::default();
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let (t, c, m, s) = (transitioned.clone(), confirmed.clone(), mismatched.clone(), Arc::clone(&statuses));
    rt.block_on(async {
        let mut hooks = EventHooks::default();
        hooks
            .on_order_transitioned(move |ev| {
                info!("🪝️ {} -> {}", ev.old_status, ev.order.status);
                s.lock().unwrap().push(ev.order.status);
                t.called();
                async {}.boxed()
            })
            .on_payment_confirmed(move |ev| {
                info!("🪝️ Payment confirmed: {}", ev.reference);
                c.called();
                async {}.boxed()
            })
            .on_amount_mismatch(move |ev| {
                info!("🪝️ Amount mismatch: expected {}, claimed {}", ev.expected, ev.claimed);
                m.called();
                async {}.boxed()
            });
        let handlers = EventHandlers::new(16, hooks);
        let producers = handlers.producers();
        handlers.start_handlers().await;
        let system = setup_with(producers, EngineConfig::default()).await;

        let order = system.order_with_reference("O1", 5000).await;
        let reference = reference_of(&order);
        let short = VerificationRequest::new(&reference, Amount::from(4000));
        assert!(system.payments.verify(short, &AuthContext::gateway()).await.is_err());
        let full = VerificationRequest::new(&reference, Amount::from(5000));
        system.payments.verify(full.clone(), &AuthContext::gateway()).await.unwrap();
        // An idempotent repeat publishes nothing
        system.payments.verify(full, &AuthContext::gateway()).await.unwrap();
        system.flow.transition(order.id, OrderStatusType::Preparing, &AuthContext::admin("ops")).await.unwrap();

        wait_for(&transitioned, 2).await;
        wait_for(&confirmed, 1).await;
        wait_for(&mismatched, 1).await;
        tear_down(system).await;
    });
    assert_eq!(transitioned.count(), 2);
    assert_eq!(confirmed.count(), 1);
    assert_eq!(mismatched.count(), 1);
    let mut seen = statuses.lock().unwrap().clone();
    seen.sort_by_key(|s| s.fulfilment_rank());
    assert_eq!(seen, vec![OrderStatusType::Confirmed, OrderStatusType::Preparing]);
    info!("🪝️ test complete");
}
