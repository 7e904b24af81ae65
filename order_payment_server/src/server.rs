use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use log::*;
use order_payment_engine::{
    events::{EventHandlers, EventHooks, EventProducers},
    traits::PlainTextRenderer,
    NotificationDispatcher,
    OrderFlowApi,
    PaymentApi,
    ReconciliationApi,
    SqliteDatabase,
    SuppressionApi,
};

use crate::{
    auth::AdminKey,
    config::{GatewayConfig, ServerConfig, ServerOptions},
    errors::ServerError,
    middleware::{HmacMiddlewareFactory, GATEWAY_HMAC_HEADER},
    routes::{
        health,
        AssignReferenceRoute,
        CorrectOrderRoute,
        EnqueueNotificationRoute,
        GatewayWebhookRoute,
        NewOrderRoute,
        OrderByIdRoute,
        OrderIncidentsRoute,
        OrderNotificationsRoute,
        PaymentStatusRoute,
        ReactivateRecipientRoute,
        ReconcileRoute,
        RequeueNotificationRoute,
        SuppressRecipientRoute,
        TransitionOrderRoute,
        VerifyPaymentRoute,
    },
    transport::LogTransport,
    workers::{start_dispatch_worker, start_sweeper_worker},
};

const EVENT_BUFFER_SIZE: usize = 64;

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, config.max_connections)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.migrate().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let producers = start_event_handlers().await;
    let flow = OrderFlowApi::new(db.clone(), producers, config.engine.clone());
    let _sweeper = start_sweeper_worker(ReconciliationApi::new(flow.clone()), config.sweep_interval);
    let dispatcher = NotificationDispatcher::new(db.clone(), LogTransport, PlainTextRenderer, config.engine.clone());
    let _dispatcher = start_dispatch_worker(dispatcher, flow.notifications().clone(), config.dispatch_interval);
    let srv = create_server_instance(config, flow)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

/// The server logs engine events. Integrations that need to react to them register further hooks here.
async fn start_event_handlers() -> EventProducers {
    let mut hooks = EventHooks::default();
    hooks.on_amount_mismatch(|ev| {
        Box::pin(async move {
            warn!(
                "🚨️ Payment for order #{} ({}) claimed {} against {} due",
                ev.order_id, ev.reference, ev.claimed, ev.expected
            );
        })
    });
    let handlers = EventHandlers::new(EVENT_BUFFER_SIZE, hooks);
    let producers = handlers.producers();
    handlers.start_handlers().await;
    producers
}

/// Every worker gets clones of the same `flow`, so handlers and background workers share one set of order locks.
pub fn create_server_instance(config: ServerConfig, flow: OrderFlowApi<SqliteDatabase>) -> Result<Server, ServerError> {
    let host = config.host.clone();
    let port = config.port;
    let srv = HttpServer::new(move || {
        let flow_api = flow.clone();
        let payment_api = PaymentApi::new(flow_api.clone());
        let reconciliation_api = ReconciliationApi::new(flow_api.clone());
        let suppression_api = SuppressionApi::new(flow_api.db().clone(), config.engine.clone());
        let app = App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("opg::access_log"))
            .app_data(web::Data::new(flow_api))
            .app_data(web::Data::new(payment_api))
            .app_data(web::Data::new(reconciliation_api))
            .app_data(web::Data::new(suppression_api))
            .app_data(web::Data::new(ServerOptions::from_config(&config)))
            .app_data(web::Data::new(AdminKey::new(config.admin_api_key.clone())));
        app.configure(|cfg| configure_routes(cfg, &config.gateway))
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((host.as_str(), port))?
    .run();
    info!("🚀️ Server is listening");
    Ok(srv)
}

/// Registers every route. The `/gateway` scope is wrapped in the HMAC check, and each `/api` route carries its own
/// admin ACL.
pub fn configure_routes(cfg: &mut web::ServiceConfig, gateway: &GatewayConfig) {
    let admin_scope = web::scope("/api")
        .service(NewOrderRoute::<SqliteDatabase>::new())
        .service(OrderByIdRoute::<SqliteDatabase>::new())
        .service(AssignReferenceRoute::<SqliteDatabase>::new())
        .service(TransitionOrderRoute::<SqliteDatabase>::new())
        .service(CorrectOrderRoute::<SqliteDatabase>::new())
        .service(OrderIncidentsRoute::<SqliteDatabase>::new())
        .service(OrderNotificationsRoute::<SqliteDatabase>::new())
        .service(EnqueueNotificationRoute::<SqliteDatabase>::new())
        .service(RequeueNotificationRoute::<SqliteDatabase>::new())
        .service(SuppressRecipientRoute::<SqliteDatabase>::new())
        .service(ReactivateRecipientRoute::<SqliteDatabase>::new())
        .service(ReconcileRoute::<SqliteDatabase>::new());
    let gateway_scope = web::scope("/gateway")
        .wrap(HmacMiddlewareFactory::new(GATEWAY_HMAC_HEADER, gateway.hmac_secret.clone(), gateway.hmac_checks))
        .service(GatewayWebhookRoute::<SqliteDatabase>::new());
    cfg.service(health)
        .service(VerifyPaymentRoute::<SqliteDatabase>::new())
        .service(PaymentStatusRoute::<SqliteDatabase>::new())
        .service(gateway_scope)
        .service(admin_scope);
}
