//! Access control list middleware for the order payment server.
//! This middleware can be placed on any route or service.
//!
//! Admin callers identify themselves with the shared admin key in the `opg_admin_key` header, and name the acting
//! admin in `opg_actor`. If the key matches the configured [`AdminKey`], an admin [`AuthContext`] is attached to the
//! request extensions, where the [`Caller`](crate::auth::Caller) extractor picks it up. Otherwise the request is
//! rejected before it reaches the handler.

use std::{pin::Pin, rc::Rc};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web,
    Error,
    HttpMessage,
};
use futures::{
    future::{ok, Ready},
    Future,
};
use log::*;
use order_payment_engine::{AuthContext, Role};

use crate::{
    auth::{AdminKey, ACTOR_HEADER, ADMIN_KEY_HEADER},
    errors::{AuthError, ServerError},
};

pub struct AclMiddlewareFactory {
    required_roles: Vec<Role>,
}

impl AclMiddlewareFactory {
    pub fn new(required_roles: &[Role]) -> Self {
        AclMiddlewareFactory { required_roles: required_roles.to_vec() }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AclMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;
    type InitError = ();
    type Response = ServiceResponse<B>;
    type Transform = AclMiddlewareService<S>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AclMiddlewareService { required_roles: self.required_roles.clone(), service: Rc::new(service) })
    }
}

pub struct AclMiddlewareService<S> {
    required_roles: Vec<Role>,
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for AclMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;
    type Response = ServiceResponse<B>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let required_roles = self.required_roles.clone();
        Box::pin(async move {
            let auth = admin_context(&req)?;
            if let Err(e) = auth.require_any(&required_roles) {
                debug!("🔐️ {e}");
                return Err(ServerError::from(AuthError::InsufficientPermissions(e.to_string())).into());
            }
            trace!("🔐️ {} is authorised for {}", auth.actor_id, req.path());
            req.extensions_mut().insert(auth);
            service.call(req).await
        })
    }
}

fn admin_context(req: &ServiceRequest) -> Result<AuthContext, ServerError> {
    let expected = req.app_data::<web::Data<AdminKey>>().ok_or_else(|| {
        error!("🔐️ No admin key has been registered with the app. Denying access.");
        ServerError::ConfigurationError("Admin key is not configured".into())
    })?;
    let supplied = req
        .headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ServerError::AuthenticationError(AuthError::MissingAdminKey))?;
    if !expected.matches(supplied) {
        warn!("🔐️ Invalid admin key presented for {}", req.path());
        return Err(AuthError::InvalidAdminKey.into());
    }
    let actor = req
        .headers()
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("admin");
    Ok(AuthContext::admin(actor))
}
