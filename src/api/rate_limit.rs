//! Per-identity request rate limiting for the API boundary.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Seconds until the caller's window resets; 0 when allowed.
    pub retry_after_seconds: u64,
}

impl RateLimitDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_seconds: 0,
        }
    }
}

pub trait RateLimiter: Send + Sync {
    /// Count one request for `identity` and decide whether it may proceed.
    fn check(&self, identity: &str) -> RateLimitDecision;
}

#[derive(Debug)]
struct Window {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window counter per identity. Expired windows are evicted on every
/// check, so the map only holds identities seen in the current window.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, Window>>,
}

impl FixedWindowLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Identities with a live window.
    pub fn tracked(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn check_at(&self, identity: &str, now: Instant) -> RateLimitDecision {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        windows.retain(|_, w| w.reset_at > now);

        match windows.get_mut(identity) {
            None => {
                windows.insert(
                    identity.to_string(),
                    Window {
                        count: 1,
                        reset_at: now + self.config.window,
                    },
                );
                RateLimitDecision::allow()
            }
            Some(window) if window.count >= self.config.max_requests => {
                let remaining = window.reset_at.saturating_duration_since(now);
                RateLimitDecision {
                    allowed: false,
                    retry_after_seconds: ceil_secs(remaining),
                }
            }
            Some(window) => {
                window.count += 1;
                RateLimitDecision::allow()
            }
        }
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn check(&self, identity: &str) -> RateLimitDecision {
        let decision = self.check_at(identity, Instant::now());
        if !decision.allowed {
            tracing::warn!(
                identity = %identity,
                retry_after = decision.retry_after_seconds,
                "Rate limit exceeded"
            );
        }
        decision
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32) -> FixedWindowLimiter {
        FixedWindowLimiter::new(RateLimitConfig {
            window: Duration::from_secs(60),
            max_requests,
        })
    }

    #[test]
    fn refuses_after_max_requests_in_window() {
        let limiter = limiter(2);
        let start = Instant::now();

        assert!(limiter.check_at("1.2.3.4", start).allowed);
        assert!(limiter.check_at("1.2.3.4", start).allowed);
        let refused = limiter.check_at("1.2.3.4", start + Duration::from_millis(20_500));

        assert!(!refused.allowed);
        assert_eq!(refused.retry_after_seconds, 40);
        assert!(limiter.check_at("5.6.7.8", start).allowed);
    }

    #[test]
    fn window_resets_and_expired_entries_are_evicted() {
        let limiter = limiter(1);
        let start = Instant::now();

        assert!(limiter.check_at("a", start).allowed);
        assert!(limiter.check_at("b", start).allowed);
        assert!(!limiter.check_at("a", start).allowed);
        assert_eq!(limiter.tracked(), 2);

        let later = start + Duration::from_secs(61);
        assert!(limiter.check_at("a", later).allowed);
        assert_eq!(limiter.tracked(), 1);
    }
}
