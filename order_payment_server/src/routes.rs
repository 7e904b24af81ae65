//! Request handler definitions
//!
//! Define each route and it handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests:
//! ```nocompile
//!     fn my_handler() -> impl Responder {
//!         std::thread::sleep(Duration::from_secs(5)); // <-- Bad practice! Will cause the current worker thread to
//! hang!
//!     }
//! ```
//! For this reason, any long, non-cpu-bound operation (e.g. I/O, database operations, etc.) should be expressed as
//! futures or asynchronous functions. Async handlers get executed concurrently by worker threads and thus don’t block
//! execution.
use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use log::*;
use order_payment_engine::{
    db_types::NewOrder,
    notification_objects::EnqueueRequest,
    AuthContext,
    OrderFlowApi,
    PaymentApi,
    PaymentGatewayDatabase,
    ReconciliationApi,
    Role,
    SuppressionApi,
};
use serde_json::Value;

use crate::{
    auth::{customer_context, Caller},
    config::ServerOptions,
    data_objects::{
        CorrectionParams,
        NewOrderParams,
        PaymentNotification,
        ReferenceParams,
        SuppressionParams,
        TransitionParams,
    },
    errors::ServerError,
    helpers::get_remote_ip,
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };

    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+ where requires [$($roles:expr),*])  => {
        paste::paste! { pub struct [<$name:camel Route>]<A>(core::marker::PhantomData<fn() -> A>);}
        paste::paste! { impl<A> [<$name:camel Route>]<A> {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(core::marker::PhantomData::<fn() -> A>)
            }
        }}
        paste::paste! { impl<A> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<A>
        where
            A: $($bounds)++ 'static,
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::<A>)
                    .wrap($crate::middleware::AclMiddlewareFactory::new(&[$($roles),+]));
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Gateway  ----------------------------------------------------
route!(gateway_webhook => Post "/webhook" impl PaymentGatewayDatabase);
/// Route handler for the payment gateway webhook.
///
/// This route lives in the `/gateway` scope, which is wrapped in the HMAC middleware. By the time a request gets here,
/// its signature has been checked and the call can be attributed to the gateway.
///
/// The body must contain at least `reference` and `amount` (minor units), and optionally `currency`. The whole body is
/// stored with the payment transaction.
pub async fn gateway_webhook<B: PaymentGatewayDatabase>(
    req: HttpRequest,
    body: web::Bytes,
    options: web::Data<ServerOptions>,
    api: web::Data<PaymentApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let peer = get_remote_ip(&req, options.use_x_forwarded_for, options.use_forwarded);
    trace!("💻️ Received gateway webhook from {peer:?}");
    let payload = serde_json::from_slice::<Value>(&body).map_err(|e| {
        warn!("💻️ Could not parse gateway webhook body. {e}");
        ServerError::CouldNotDeserializePayload(e.to_string())
    })?;
    let notification = serde_json::from_value::<PaymentNotification>(payload.clone()).map_err(|e| {
        warn!("💻️ Gateway webhook is missing payment fields. {e}");
        ServerError::CouldNotDeserializePayload(e.to_string())
    })?;
    debug!("💻️ Gateway reports payment of {} for {}", notification.amount, notification.reference);
    let request = notification.into_verification_request(payload);
    let result = api.verify(request, &AuthContext::gateway()).await?;
    Ok(HttpResponse::Ok().json(result))
}

//----------------------------------------------   Payments  ----------------------------------------------------
route!(verify_payment => Post "/payments/verify" impl PaymentGatewayDatabase);
/// Client-side confirmation after a redirect from the payment page.
///
/// This goes through exactly the same checks as the webhook. Whichever of the two arrives first completes the payment
/// and the other one reports `already_verified`.
pub async fn verify_payment<B: PaymentGatewayDatabase>(
    req: HttpRequest,
    body: web::Json<PaymentNotification>,
    api: web::Data<PaymentApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let auth = customer_context(&req);
    let notification = body.into_inner();
    debug!("💻️ POST verify payment {} for {}", notification.reference, auth.actor_id);
    let payload = serde_json::to_value(&notification).unwrap_or(Value::Null);
    let result = api.verify(notification.into_verification_request(payload), &auth).await?;
    Ok(HttpResponse::Ok().json(result))
}

route!(payment_status => Get "/payments/{reference}" impl PaymentGatewayDatabase);
pub async fn payment_status<B: PaymentGatewayDatabase>(
    path: web::Path<String>,
    api: web::Data<PaymentApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let reference = path.into_inner();
    trace!("💻️ GET payment status for {reference}");
    let status = api.payment_status(&reference).await?;
    Ok(HttpResponse::Ok().json(status))
}

//----------------------------------------------   Orders  ----------------------------------------------------
route!(new_order => Post "/orders" impl PaymentGatewayDatabase where requires [Role::Admin]);
/// Order intake. Idempotent on `order_number`: posting the same order twice returns the stored order.
pub async fn new_order<B: PaymentGatewayDatabase>(
    body: web::Json<NewOrderParams>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order = NewOrder::from(body.into_inner());
    debug!("💻️ POST new order {}", order.order_number);
    let order = api.process_new_order(order).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(order_by_id => Get "/orders/{id}" impl PaymentGatewayDatabase where requires [Role::Admin]);
/// Returns the order together with its status history, payment transactions, incidents and notifications.
pub async fn order_by_id<B: PaymentGatewayDatabase>(
    path: web::Path<i64>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order_id = path.into_inner();
    debug!("💻️ GET order #{order_id}");
    let details = api.order_details(order_id).await?;
    Ok(HttpResponse::Ok().json(details))
}

route!(assign_reference => Post "/orders/{id}/reference" impl PaymentGatewayDatabase where requires [Role::Admin]);
/// Gives the order a payment reference before the customer is sent to the gateway. Calling this again returns the
/// same reference.
pub async fn assign_reference<B: PaymentGatewayDatabase>(
    caller: Caller,
    path: web::Path<i64>,
    body: Option<web::Json<ReferenceParams>>,
    api: web::Data<PaymentApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order_id = path.into_inner();
    let params = body.map(|b| b.into_inner()).unwrap_or_default();
    debug!("💻️ POST assign reference for order #{order_id}");
    let order = api.assign_payment_reference(order_id, params.reference.as_deref(), &caller.0).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(transition_order => Post "/orders/{id}/status" impl PaymentGatewayDatabase where requires [Role::Admin]);
pub async fn transition_order<B: PaymentGatewayDatabase>(
    caller: Caller,
    path: web::Path<i64>,
    body: web::Json<TransitionParams>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order_id = path.into_inner();
    let target = body.into_inner().status;
    info!("💻️ {} requests order #{order_id} -> {target}", caller.0.actor_id);
    let order = api.transition(order_id, target, &caller.0).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(correct_order => Post "/orders/{id}/correction" impl PaymentGatewayDatabase where requires [Role::Admin]);
/// The correction path. Any status change is allowed, including backwards, but a reason is mandatory.
pub async fn correct_order<B: PaymentGatewayDatabase>(
    caller: Caller,
    path: web::Path<i64>,
    body: web::Json<CorrectionParams>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order_id = path.into_inner();
    let CorrectionParams { status, reason } = body.into_inner();
    warn!("💻️ {} is correcting order #{order_id} to {status}: {reason}", caller.0.actor_id);
    let order = api.correct_status(order_id, status, &reason, &caller.0).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(order_incidents => Get "/orders/{id}/incidents" impl PaymentGatewayDatabase where requires [Role::Admin]);
pub async fn order_incidents<B: PaymentGatewayDatabase>(
    caller: Caller,
    path: web::Path<i64>,
    api: web::Data<PaymentApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order_id = path.into_inner();
    debug!("💻️ GET incidents for order #{order_id}");
    let incidents = api.incidents_for_order(order_id, &caller.0).await?;
    Ok(HttpResponse::Ok().json(incidents))
}

//----------------------------------------------   Notifications  ----------------------------------------------------
route!(order_notifications => Get "/orders/{id}/notifications" impl PaymentGatewayDatabase where requires [Role::Admin]);
pub async fn order_notifications<B: PaymentGatewayDatabase>(
    path: web::Path<i64>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order_id = path.into_inner();
    debug!("💻️ GET notifications for order #{order_id}");
    let events = api.notifications().notifications_for_order(order_id).await?;
    Ok(HttpResponse::Ok().json(events))
}

route!(enqueue_notification => Post "/notifications" impl PaymentGatewayDatabase where requires [Role::Admin]);
pub async fn enqueue_notification<B: PaymentGatewayDatabase>(
    caller: Caller,
    body: web::Json<EnqueueRequest>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let request = body.into_inner();
    debug!("💻️ POST notification {} for order #{}", request.template_key, request.order_id);
    let result = api.notifications().enqueue(request, &caller.0).await?;
    Ok(HttpResponse::Ok().json(result))
}

route!(requeue_notification => Post "/notifications/{id}/requeue" impl PaymentGatewayDatabase where requires [Role::Admin]);
/// Manual recovery for failed and dead-lettered notifications.
pub async fn requeue_notification<B: PaymentGatewayDatabase>(
    caller: Caller,
    path: web::Path<i64>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let event_id = path.into_inner();
    info!("💻️ {} requeues notification #{event_id}", caller.0.actor_id);
    let event = api.notifications().requeue(event_id, &caller.0).await?;
    Ok(HttpResponse::Ok().json(event))
}

//----------------------------------------------   Suppressions  ----------------------------------------------------
route!(suppress_recipient => Post "/suppressions" impl PaymentGatewayDatabase where requires [Role::Admin]);
pub async fn suppress_recipient<B: PaymentGatewayDatabase>(
    caller: Caller,
    body: web::Json<SuppressionParams>,
    api: web::Data<SuppressionApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let SuppressionParams { recipient, reason } = body.into_inner();
    let entry = api.suppress(&recipient, reason, &caller.0).await?;
    Ok(HttpResponse::Ok().json(entry))
}

route!(reactivate_recipient => Delete "/suppressions/{recipient}" impl PaymentGatewayDatabase where requires [Role::Admin]);
pub async fn reactivate_recipient<B: PaymentGatewayDatabase>(
    caller: Caller,
    path: web::Path<String>,
    api: web::Data<SuppressionApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let recipient = path.into_inner();
    let entry = api.reactivate(&recipient, &caller.0).await?;
    Ok(HttpResponse::Ok().json(entry))
}

//----------------------------------------------   Reconciliation  ----------------------------------------------------
route!(reconcile => Post "/reconcile" impl PaymentGatewayDatabase where requires [Role::Admin]);
/// Runs the reconciliation sweeper now, rather than waiting for the next scheduled run.
pub async fn reconcile<B: PaymentGatewayDatabase>(
    caller: Caller,
    api: web::Data<ReconciliationApi<B>>,
) -> Result<HttpResponse, ServerError> {
    info!("💻️ {} triggered a reconciliation sweep", caller.0.actor_id);
    let report = api.run_sweep().await?;
    Ok(HttpResponse::Ok().json(report))
}
