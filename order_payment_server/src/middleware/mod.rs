mod acl;
mod hmac;

pub use acl::{AclMiddlewareFactory, AclMiddlewareService};
pub use hmac::{HmacMiddlewareFactory, HmacMiddlewareService, GATEWAY_HMAC_HEADER};
