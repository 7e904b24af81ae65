use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{
    AmountMismatchEvent,
    EventHandler,
    EventProducer,
    Handler,
    OrderTransitionedEvent,
    PaymentConfirmedEvent,
};

#[derive(Default, Clone)]
pub struct EventProducers {
    pub order_transitioned_producer: Vec<EventProducer<OrderTransitionedEvent>>,
    pub payment_confirmed_producer: Vec<EventProducer<PaymentConfirmedEvent>>,
    pub amount_mismatch_producer: Vec<EventProducer<AmountMismatchEvent>>,
}

impl EventProducers {
    pub async fn publish_order_transitioned(&self, event: OrderTransitionedEvent) {
        for producer in &self.order_transitioned_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_payment_confirmed(&self, event: PaymentConfirmedEvent) {
        for producer in &self.payment_confirmed_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_amount_mismatch(&self, event: AmountMismatchEvent) {
        for producer in &self.amount_mismatch_producer {
            producer.publish_event(event.clone()).await;
        }
    }
}

pub struct EventHandlers {
    pub on_order_transitioned: Option<EventHandler<OrderTransitionedEvent>>,
    pub on_payment_confirmed: Option<EventHandler<PaymentConfirmedEvent>>,
    pub on_amount_mismatch: Option<EventHandler<AmountMismatchEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_order_transitioned = hooks.on_order_transitioned.map(|f| EventHandler::new(buffer_size, f));
        let on_payment_confirmed = hooks.on_payment_confirmed.map(|f| EventHandler::new(buffer_size, f));
        let on_amount_mismatch = hooks.on_amount_mismatch.map(|f| EventHandler::new(buffer_size, f));
        Self { on_order_transitioned, on_payment_confirmed, on_amount_mismatch }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_order_transitioned {
            result.order_transitioned_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_payment_confirmed {
            result.payment_confirmed_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_amount_mismatch {
            result.amount_mismatch_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_order_transitioned {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_payment_confirmed {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_amount_mismatch {
            tokio::spawn(handler.start_handler());
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_order_transitioned: Option<Handler<OrderTransitionedEvent>>,
    pub on_payment_confirmed: Option<Handler<PaymentConfirmedEvent>>,
    pub on_amount_mismatch: Option<Handler<AmountMismatchEvent>>,
}

impl EventHooks {
    pub fn on_order_transitioned<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OrderTransitionedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_order_transitioned = Some(Arc::new(f));
        self
    }

    pub fn on_payment_confirmed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PaymentConfirmedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_payment_confirmed = Some(Arc::new(f));
        self
    }

    pub fn on_amount_mismatch<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(AmountMismatchEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_amount_mismatch = Some(Arc::new(f));
        self
    }
}
