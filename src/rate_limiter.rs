//! Per-endpoint sliding-window rate limiting for the external API boundary.
//!
//! The API surface itself is out of scope for this engine, but the limiter
//! behavior isn't — built on `governor`/`nonzero_ext`, the same crates the
//! donor already pulls in for `jupiter_rate_limiter.rs`, keyed by a
//! caller-supplied label (client id, IP, or endpoint name) rather than the
//! donor's single global quota.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{Quota, RateLimiter as GovernorLimiter};
use nonzero_ext::nonzero;

use crate::audit::AuditLog;

/// Wraps a keyed `governor` limiter; each distinct `key` gets its own
/// independent quota and window.
pub struct RateLimiter {
    inner: GovernorLimiter<String, governor::state::keyed::DefaultKeyedStateStore<String>, governor::clock::DefaultClock>,
    audit: Option<Arc<AuditLog>>,
}

impl RateLimiter {
    /// `requests_per_window` over `window_secs`, with bursting up to
    /// `burst` requests before the steady-state rate applies.
    pub fn new(requests_per_window: u32, window_secs: u32, burst: u32) -> Self {
        let window = std::time::Duration::from_secs(window_secs.max(1) as u64);
        let replenish_interval = window / requests_per_window.max(1);
        let quota = Quota::with_period(replenish_interval)
            .expect("replenish interval is always positive")
            .allow_burst(NonZeroU32::new(burst.max(1)).unwrap_or(nonzero!(1u32)));
        Self { inner: GovernorLimiter::keyed(quota), audit: None }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// `true` if `key` is still within its quota (and the request is
    /// admitted); `false` if it was rejected as over-limit. Rejections are
    /// reported to the audit log when one is attached.
    pub fn check(&self, key: &str) -> bool {
        match self.inner.check_key(&key.to_string()) {
            Ok(()) => true,
            Err(_) => {
                if let Some(audit) = &self.audit {
                    audit.log_rate_limit_exceeded(key, 0);
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_keys_have_independent_quotas() {
        let limiter = RateLimiter::new(1, 60, 1);
        assert!(limiter.check("client-a"));
        assert!(!limiter.check("client-a"));
        assert!(limiter.check("client-b"));
    }

    #[test]
    fn burst_allows_more_than_one_immediate_request() {
        let limiter = RateLimiter::new(5, 60, 3);
        assert!(limiter.check("bursty"));
        assert!(limiter.check("bursty"));
        assert!(limiter.check("bursty"));
        assert!(!limiter.check("bursty"));
    }
}
