//! Suppressions and per-recipient rate limits.
//!
//! Both are consulted before anything is sent. They are read-mostly and tolerate small races: two dispatchers may
//! each let one extra message through at a window boundary.
use std::fmt::Debug;

use chrono::{DateTime, Duration, DurationRound, Utc};
use log::*;
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{SuppressionEntry, SuppressionReason},
    opg_api::{
        auth_context::{AuthContext, Role},
        engine_config::EngineConfig,
    },
    traits::{PaymentGatewayDatabase, PaymentGatewayError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum RateLimitDecision {
    Allowed { count: i64 },
    Limited { retry_at: DateTime<Utc> },
}

pub struct SuppressionApi<B> {
    db: B,
    config: EngineConfig,
}

impl<B: Clone> Clone for SuppressionApi<B> {
    fn clone(&self) -> Self {
        Self { db: self.db.clone(), config: self.config.clone() }
    }
}

impl<B> Debug for SuppressionApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SuppressionApi")
    }
}

/// Lower-cases and trims an address.
pub fn normalize_recipient(recipient: &str) -> String {
    recipient.trim().to_lowercase()
}

/// The suppression keys that cover a recipient: the address itself and, for email addresses, `@domain`.
pub fn suppression_candidates(recipient: &str) -> Vec<String> {
    let recipient = normalize_recipient(recipient);
    let mut candidates = Vec::with_capacity(2);
    if let Some((_, domain)) = recipient.rsplit_once('@') {
        if !domain.is_empty() {
            candidates.push(format!("@{domain}"));
        }
    }
    candidates.push(recipient);
    candidates
}

impl<B> SuppressionApi<B> {
    pub fn new(db: B, config: EngineConfig) -> Self {
        Self { db, config }
    }
}

impl<B> SuppressionApi<B>
where B: PaymentGatewayDatabase
{
    /// Blocks further sends to a recipient. Bounce and complaint processing calls this as `System`.
    pub async fn suppress(
        &self,
        recipient: &str,
        reason: SuppressionReason,
        auth: &AuthContext,
    ) -> Result<SuppressionEntry, PaymentGatewayError> {
        auth.require_any(&[Role::Admin, Role::System])?;
        let recipient = normalize_recipient(recipient);
        let valid = match recipient.strip_prefix('@') {
            Some(domain) => !domain.is_empty() && !domain.contains('@'),
            None => !recipient.is_empty(),
        };
        if !valid {
            return Err(PaymentGatewayError::ValidationError(format!("'{recipient}' cannot be suppressed")));
        }
        let entry = self.db.upsert_suppression(&recipient, reason).await?;
        info!("📬️ {recipient} is suppressed ({}) on behalf of {}", entry.reason, auth.actor_id);
        Ok(entry)
    }

    /// Lifts a suppression. Admins only.
    pub async fn reactivate(&self, recipient: &str, auth: &AuthContext) -> Result<SuppressionEntry, PaymentGatewayError> {
        auth.require_any(&[Role::Admin])?;
        let recipient = normalize_recipient(recipient);
        let entry = self
            .db
            .reactivate_suppression(&recipient, &auth.actor_id)
            .await?
            .ok_or_else(|| PaymentGatewayError::NotFound(format!("active suppression for {recipient}")))?;
        info!("📬️ {} reactivated {recipient}", auth.actor_id);
        Ok(entry)
    }

    /// Any active suppression covering the recipient, including unsubscribes.
    pub async fn is_suppressed(&self, recipient: &str) -> Result<Option<SuppressionEntry>, PaymentGatewayError> {
        let entries = self.db.fetch_active_suppressions(&suppression_candidates(recipient)).await?;
        Ok(entries.into_iter().next())
    }

    /// The active suppression that blocks transactional mail to the recipient, if any.
    pub async fn is_blocking(&self, recipient: &str) -> Result<Option<SuppressionEntry>, PaymentGatewayError> {
        let entries = self.db.fetch_active_suppressions(&suppression_candidates(recipient)).await?;
        Ok(entries.into_iter().find(|e| e.reason.blocks_transactional()))
    }

    /// Counts one send against the recipient's current window.
    pub async fn check_rate_limit(&self, identifier: &str) -> Result<RateLimitDecision, PaymentGatewayError> {
        let now = Utc::now();
        let window_start = self.window_start(now);
        let count = self.db.increment_rate_window(&normalize_recipient(identifier), window_start).await?;
        if count > self.config.rate_limit_max {
            let retry_at = window_start + self.config.rate_limit_window;
            debug!("📬️ {identifier} has hit the rate limit ({count} sends). Next window opens at {retry_at}");
            Ok(RateLimitDecision::Limited { retry_at })
        } else {
            Ok(RateLimitDecision::Allowed { count })
        }
    }

    /// Drops every window older than the current one.
    pub async fn purge_expired_windows(&self) -> Result<u64, PaymentGatewayError> {
        let cutoff = self.window_start(Utc::now());
        let purged = self.db.purge_rate_windows(cutoff).await?;
        if purged > 0 {
            trace!("📬️ Purged {purged} expired rate-limit windows");
        }
        Ok(purged)
    }

    fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let window = if self.config.rate_limit_window > Duration::zero() {
            self.config.rate_limit_window
        } else {
            Duration::hours(1)
        };
        now.duration_trunc(window).unwrap_or(now)
    }
}
