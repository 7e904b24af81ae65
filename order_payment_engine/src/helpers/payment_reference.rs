//! # Payment references
//!
//! Every order that is sent to the gateway carries a backend-generated reference of the form
//!
//! ```text
//!    txn_{time}_{random}
//! ```
//!
//! where
//!   * `time` is the current unix time in milliseconds followed by a 4-digit wrapping process counter, all in
//!     lower-case hexadecimal. References are therefore ordered by creation time within a process.
//!   * `random` is 16 alphanumeric characters drawn from the thread-local CSPRNG.
//!
//! Client-supplied references are never trusted as-is. If a client proposes a reference that does not match this
//! format, it is replaced by a freshly generated one.
use std::{
    fmt::Display,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        OnceLock,
    },
};

use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const REFERENCE_PREFIX: &str = "txn_";
const RANDOM_LEN: usize = 16;

static COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Malformed payment reference: '{0}'")]
pub struct PaymentReferenceError(String);

fn reference_format() -> &'static Regex {
    static FORMAT: OnceLock<Regex> = OnceLock::new();
    FORMAT.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^txn_[0-9a-f]{10,24}_[0-9A-Za-z]{16}$").unwrap()
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaymentReference(String);

impl PaymentReference {
    /// Generates a new reference. Panics only if the OS cannot provide entropy, in which case the process cannot
    /// safely issue references anyway.
    pub fn generate() -> Self {
        let millis = Utc::now().timestamp_millis().max(0) as u64;
        let counter = COUNTER.fetch_add(1, Ordering::Relaxed) & 0xffff;
        let random: String = rand::thread_rng().sample_iter(&Alphanumeric).take(RANDOM_LEN).map(char::from).collect();
        Self(format!("{REFERENCE_PREFIX}{millis:x}{counter:04x}_{random}"))
    }

    pub fn is_well_formed(s: &str) -> bool {
        reference_format().is_match(s)
    }

    /// Accepts a client's proposed reference if it is well-formed, otherwise generates a replacement.
    /// The boolean is true when the proposal was rejected.
    pub fn from_client_proposal(proposal: Option<&str>) -> (Self, bool) {
        match proposal.map(str::trim).filter(|s| !s.is_empty()) {
            None => (Self::generate(), false),
            Some(s) => match s.parse::<Self>() {
                Ok(r) => (r, false),
                Err(_) => (Self::generate(), true),
            },
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PaymentReference {
    type Err = PaymentReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if Self::is_well_formed(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(PaymentReferenceError(s.to_string()))
        }
    }
}

impl TryFrom<String> for PaymentReference {
    type Error = PaymentReferenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PaymentReference> for String {
    fn from(value: PaymentReference) -> Self {
        value.0
    }
}

impl Display for PaymentReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn generated_references_are_well_formed() {
        let reference = PaymentReference::generate();
        assert!(reference.as_str().starts_with("txn_"));
        assert!(PaymentReference::is_well_formed(reference.as_str()), "{reference}");
    }

    #[test]
    fn mini_fuzz_uniqueness() {
        let refs = (0..5000).map(|_| PaymentReference::generate()).collect::<HashSet<_>>();
        assert_eq!(refs.len(), 5000);
    }

    #[test]
    fn rejects_malformed() {
        assert!("txn_123".parse::<PaymentReference>().is_err());
        assert!("order-55".parse::<PaymentReference>().is_err());
        assert!("txn_18f3a2b4c5d0001_abc".parse::<PaymentReference>().is_err());
        assert!("txn_18f3a2b4c5d0001_abcdEFGH12345678".parse::<PaymentReference>().is_ok());
    }

    #[test]
    fn client_proposals() {
        let (r, rejected) = PaymentReference::from_client_proposal(Some("txn_18f3a2b4c5d0001_abcdEFGH12345678"));
        assert_eq!(r.as_str(), "txn_18f3a2b4c5d0001_abcdEFGH12345678");
        assert!(!rejected);
        let (r, rejected) = PaymentReference::from_client_proposal(Some("my-own-ref"));
        assert_ne!(r.as_str(), "my-own-ref");
        assert!(rejected);
        let (_, rejected) = PaymentReference::from_client_proposal(None);
        assert!(!rejected);
    }
}
