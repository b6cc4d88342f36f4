//! Reconnect policy and capped exponential backoff
//!
//! Delay for the Nth reconnect attempt (N starting at 1) is
//! `min(initial * multiplier^(N-1), max)`. The policy itself is immutable;
//! the attempt counter lives in the state machine.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::state::{CloseEvent, CLOSE_NORMAL};

/// Predicate deciding whether a close event warrants reconnecting
pub type CloseFilter = Arc<dyn Fn(&CloseEvent) -> bool + Send + Sync>;

/// Immutable reconnect configuration
#[derive(Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Reconnect attempts allowed before giving up
    pub max_attempts: u32,
    /// Master switch; when false every close is terminal
    pub enabled: bool,
    close_filter: Option<CloseFilter>,
}

/// Outcome of evaluating a close against the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Schedule attempt number `attempt` after `delay`
    Retry { attempt: u32, delay: Duration },
    /// Attempt budget used up
    Exhausted { attempts: u32 },
    /// Reconnect disabled or predicate rejected the close
    Declined,
}

impl ReconnectPolicy {
    pub fn new(
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            max_attempts,
            enabled: true,
            close_filter: None,
        }
    }

    /// Policy that never reconnects
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Install the reconnect predicate
    pub fn with_close_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&CloseEvent) -> bool + Send + Sync + 'static,
    {
        self.close_filter = Some(Arc::new(filter));
        self
    }

    /// Predicate that treats a clean server-side normal closure as final
    pub fn skip_clean_close(self) -> Self {
        self.with_close_filter(|event| !(event.was_clean && event.code == CLOSE_NORMAL))
    }

    /// Whether the predicate approves reconnecting after `event`
    pub fn approves(&self, event: &CloseEvent) -> bool {
        self.enabled && self.close_filter.as_ref().map_or(true, |f| f(event))
    }

    /// Delay before attempt number `attempt` (1-based)
    #[inline]
    pub fn delay(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self)
    }

    /// Evaluate a close that was not caused by a manual disconnect
    pub fn decide(&self, event: &CloseEvent, attempts_so_far: u32) -> ReconnectDecision {
        if !self.approves(event) {
            return ReconnectDecision::Declined;
        }
        if attempts_so_far >= self.max_attempts {
            return ReconnectDecision::Exhausted {
                attempts: attempts_so_far,
            };
        }
        let attempt = attempts_so_far + 1;
        ReconnectDecision::Retry {
            attempt,
            delay: self.delay(attempt),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_millis(30_000), 1.5, 3)
    }
}

impl fmt::Debug for ReconnectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectPolicy")
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("multiplier", &self.multiplier)
            .field("max_attempts", &self.max_attempts)
            .field("enabled", &self.enabled)
            .field("close_filter", &self.close_filter.is_some())
            .finish()
    }
}

/// Capped exponential backoff, attempt numbers start at 1
///
/// Attempt 0 is treated as attempt 1. Overflowing or non-finite growth
/// clamps to `max_delay`.
pub fn backoff_delay(attempt: u32, policy: &ReconnectPolicy) -> Duration {
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let max = policy.max_delay.as_secs_f64();
    let base = policy.initial_delay.as_secs_f64() * policy.multiplier.powi(exponent);

    if !base.is_finite() || base >= max {
        return policy.max_delay;
    }
    Duration::from_secs_f64(base)
}
