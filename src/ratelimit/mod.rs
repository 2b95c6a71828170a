//! Sliding-window rate limiting keyed by identity
//!
//! Each identity (`key:<apiKey>` or `ip:<address>`) owns the epoch-second
//! timestamps of its recent requests. Every evaluation prunes the window,
//! records the current request and compares the count with the limit.
//! Rejected requests are recorded too, so retrying while limited keeps the
//! window full instead of resetting it.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

use crate::clock::Clock;

/// Alerts fire each time the excess over the limit reaches a multiple of this
pub const ALERT_EXCESS_STEP: u32 = 10;

/// Longest window any identity can be given (one year)
pub const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// Window length and request budget for one identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimits {
    pub window_secs: u64,
    pub max: u32,
}

impl RateLimits {
    /// `window_secs` is capped at [`MAX_WINDOW_SECS`]
    pub fn new(window_secs: u64, max: u32) -> Self {
        Self {
            window_secs: window_secs.min(MAX_WINDOW_SECS),
            max,
        }
    }
}

fn span(window_secs: u64) -> i64 {
    window_secs.min(MAX_WINDOW_SECS) as i64
}

/// Outcome of [`RateLimiter::admit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub current_count: u32,
    pub remaining: u32,
    pub limits: RateLimits,
    /// Epoch second at which the oldest request in the window expires
    pub reset_at: i64,
}

impl RateDecision {
    pub fn excess(&self) -> u32 {
        self.current_count.saturating_sub(self.limits.max)
    }

    /// The excess count when this evaluation should raise an abuse alert
    pub fn alert_excess(&self) -> Option<u32> {
        let excess = self.excess();
        (excess > 0 && excess % ALERT_EXCESS_STEP == 0).then_some(excess)
    }
}

/// Read-only view of an identity's window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateStatus {
    pub count: u32,
    pub remaining: u32,
    pub limits: RateLimits,
}

#[derive(Debug, Default)]
struct RateWindow {
    stamps: VecDeque<i64>,
    /// Window length last used for this identity, for idle sweeping
    window_secs: u64,
}

impl RateWindow {
    fn prune(&mut self, now: i64, window_secs: u64) {
        let window_start = now.saturating_sub(span(window_secs));
        while self.stamps.front().is_some_and(|t| *t < window_start) {
            self.stamps.pop_front();
        }
    }

    fn count(&self) -> u32 {
        self.stamps.len().min(u32::MAX as usize) as u32
    }
}

/// In-memory, process-lifetime limiter. The per-identity entry lock of the
/// map guards the prune/append/count sequence.
pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
        }
    }

    /// Record a request for `identity` and decide whether it is admitted
    pub fn admit(&self, identity: &str, limits: RateLimits) -> RateDecision {
        let now = self.clock.epoch_secs();

        let mut window = self.windows.entry(identity.to_string()).or_default();
        window.prune(now, limits.window_secs);
        window.stamps.push_back(now);
        window.window_secs = limits.window_secs;

        let current_count = window.count();
        let oldest = window.stamps.front().copied().unwrap_or(now);
        drop(window);

        let decision = RateDecision {
            allowed: current_count <= limits.max,
            current_count,
            remaining: limits.max.saturating_sub(current_count),
            limits,
            reset_at: oldest.saturating_add(span(limits.window_secs)),
        };

        if !decision.allowed {
            debug!(
                identity = %identity,
                count = current_count,
                max = limits.max,
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Current count for `identity` without recording a request
    pub fn status(&self, identity: &str, limits: RateLimits) -> RateStatus {
        let now = self.clock.epoch_secs();
        let window_start = now.saturating_sub(span(limits.window_secs));

        let count = self
            .windows
            .get(identity)
            .map(|w| w.stamps.iter().filter(|t| **t >= window_start).count())
            .unwrap_or(0)
            .min(u32::MAX as usize) as u32;

        RateStatus {
            count,
            remaining: limits.max.saturating_sub(count),
            limits,
        }
    }

    /// Forget an identity's history. Returns whether it had any.
    pub fn reset(&self, identity: &str) -> bool {
        self.windows.remove(identity).is_some()
    }

    /// Drop identities whose whole window has expired
    pub fn sweep_idle(&self) -> usize {
        let now = self.clock.epoch_secs();
        let before = self.windows.len();
        self.windows.retain(|_, w| {
            w.stamps
                .back()
                .is_some_and(|last| *last >= now.saturating_sub(span(w.window_secs)))
        });
        before - self.windows.len()
    }

    /// Number of identities currently tracked
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}
