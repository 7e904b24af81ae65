use std::future::{ready, Ready};

use actix_web::{dev::Payload, FromRequest, HttpMessage, HttpRequest};
use log::debug;
use opg_common::Secret;
use order_payment_engine::AuthContext;

use crate::errors::{AuthError, ServerError};

pub const ADMIN_KEY_HEADER: &str = "opg_admin_key";
pub const ACTOR_HEADER: &str = "opg_actor";
/// Customers polling their own payment may identify themselves with this header. It is informational only.
pub const CUSTOMER_HEADER: &str = "opg_customer_id";

/// The shared key that admin callers must present.
#[derive(Clone, Debug)]
pub struct AdminKey(Secret<String>);

impl AdminKey {
    pub fn new(key: Secret<String>) -> Self {
        Self(key)
    }

    /// Compares in constant time with respect to the content of the supplied key.
    pub fn matches(&self, supplied: &str) -> bool {
        let expected = self.0.reveal().as_bytes();
        let supplied = supplied.trim().as_bytes();
        if expected.is_empty() || expected.len() != supplied.len() {
            return false;
        }
        expected.iter().zip(supplied).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
    }
}

/// The authorisation context that the ACL middleware attached to this request.
#[derive(Clone, Debug)]
pub struct Caller(pub AuthContext);

impl FromRequest for Caller {
    type Error = ServerError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let result = req.extensions().get::<AuthContext>().cloned().map(Caller).ok_or_else(|| {
            debug!("🔐️ No authorisation context on request to {}", req.path());
            ServerError::from(AuthError::InsufficientPermissions("No credentials were supplied".into()))
        });
        ready(result)
    }
}

/// Builds the customer context for unauthenticated payment polling.
pub fn customer_context(req: &HttpRequest) -> AuthContext {
    let customer = req
        .headers()
        .get(CUSTOMER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("anonymous");
    AuthContext::customer(customer)
}

#[cfg(test)]
mod test {
    use actix_web::test::TestRequest;

    use super::*;

    #[test]
    fn admin_key_comparison() {
        let key = AdminKey::new(Secret::new("s3cr3t-key".to_string()));
        assert!(key.matches("s3cr3t-key"));
        assert!(key.matches(" s3cr3t-key "));
        assert!(!key.matches("s3cr3t-kez"));
        assert!(!key.matches("s3cr3t"));
        assert!(!AdminKey::new(Secret::default()).matches(""));
    }

    #[test]
    fn customer_context_defaults_to_anonymous() {
        let req = TestRequest::default().to_http_request();
        assert_eq!(customer_context(&req).actor_id, "anonymous");
        let req = TestRequest::default().insert_header((CUSTOMER_HEADER, "cust-7")).to_http_request();
        let auth = customer_context(&req);
        assert_eq!(auth.actor_id, "cust-7");
        assert!(!auth.is_privileged());
    }
}
