use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::traits::PaymentGatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Background workers and engine-internal flows.
    System,
    Admin,
    /// The payment gateway, after its webhook signature has been checked.
    Gateway,
    Customer,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::Admin => "admin",
            Role::Gateway => "gateway",
            Role::Customer => "customer",
        };
        f.write_str(s)
    }
}

impl FromStr for Role {
    type Err = PaymentGatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "system" => Ok(Role::System),
            "admin" => Ok(Role::Admin),
            "gateway" => Ok(Role::Gateway),
            "customer" => Ok(Role::Customer),
            other => Err(PaymentGatewayError::ValidationError(format!("Unknown role: {other}"))),
        }
    }
}

/// Who is calling, and in what capacity. Every public entry point takes one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub actor_id: String,
    pub roles: Vec<Role>,
}

impl AuthContext {
    pub fn new<S: Into<String>>(actor_id: S, roles: &[Role]) -> Self {
        Self { actor_id: actor_id.into(), roles: roles.to_vec() }
    }

    pub fn system() -> Self {
        Self::new("system", &[Role::System])
    }

    pub fn admin<S: Into<String>>(actor_id: S) -> Self {
        Self::new(actor_id, &[Role::Admin])
    }

    pub fn gateway() -> Self {
        Self::new("gateway", &[Role::Gateway])
    }

    pub fn customer<S: Into<String>>(customer_id: S) -> Self {
        Self::new(customer_id, &[Role::Customer])
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Succeeds if the caller holds at least one of `allowed`.
    pub fn require_any(&self, allowed: &[Role]) -> Result<(), PaymentGatewayError> {
        if allowed.iter().any(|r| self.has_role(*r)) {
            Ok(())
        } else {
            let allowed = allowed.iter().map(Role::to_string).collect::<Vec<_>>().join(", ");
            Err(PaymentGatewayError::Unauthorized(format!("{} needs one of these roles: {allowed}", self.actor_id)))
        }
    }

    /// True for callers that act on behalf of the platform rather than a single customer.
    pub fn is_privileged(&self) -> bool {
        self.has_role(Role::Admin) || self.has_role(Role::System)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn role_checks() {
        let admin = AuthContext::admin("alice");
        assert!(admin.require_any(&[Role::Admin, Role::System]).is_ok());
        assert!(admin.is_privileged());
        let customer = AuthContext::customer("cust-1");
        let err = customer.require_any(&[Role::Admin]).unwrap_err();
        assert!(matches!(err, PaymentGatewayError::Unauthorized(_)));
        assert!(!customer.is_privileged());
        assert_eq!("Gateway".parse::<Role>().unwrap(), Role::Gateway);
        assert!("root".parse::<Role>().is_err());
    }
}
