//! Client-side reconnection policy and observable state.
//!
//! The supervisor itself lives with the client (it owns the connection
//! lifecycle); this module holds the policy — options, the backoff schedule,
//! and the state/event types callers observe.
//!
//! Delay for attempt n (0-based): `min(initial_delay × multiplier^n,
//! max_delay)`. The attempt counter resets to zero only on a successful
//! reconnect. A user-initiated disconnect always short-circuits to
//! `Disconnected` and cancels any pending attempt. Initial connect failures
//! are never auto-retried.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

/// Observable connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReconnectState {
    #[default]
    Disconnected,
    Connected,
    Reconnecting,
    Failed,
}

/// Reconnection policy knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectOptions {
    /// Whether unexpected disconnects trigger reconnection at all.
    pub enabled: bool,

    /// Attempts before giving up; 0 means unlimited.
    pub max_attempts: u32,

    /// Delay before the first attempt.
    #[serde(with = "crate::config::duration_serde")]
    pub initial_delay: Duration,

    /// Ceiling for the backoff schedule.
    #[serde(with = "crate::config::duration_serde")]
    pub max_delay: Duration,

    /// Multiplier applied per failed attempt.
    pub backoff_multiplier: f64,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 0,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectOptions {
    /// Backoff delay for the given 0-based attempt number.
    /// `delay_for_attempt(0) == initial_delay`; non-decreasing; capped at
    /// `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt.min(1024) as i32);
        let capped = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Validate the options, returning the list of problems found.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.initial_delay.is_zero() {
            errors.push("Reconnect initial delay must be greater than 0".to_string());
        }
        if self.max_delay < self.initial_delay {
            errors.push("Reconnect max delay must be at least the initial delay".to_string());
        }
        if self.backoff_multiplier < 1.0 {
            errors.push(format!(
                "Reconnect backoff multiplier must be >= 1.0 (got {})",
                self.backoff_multiplier
            ));
        }
        errors
    }
}

/// Progress notifications from the reconnection supervisor.
#[derive(Debug, Clone)]
pub enum ReconnectEvent {
    /// Fired before each wait, so callers can observe progress. `attempt`
    /// is 1-based.
    Reconnecting { attempt: u32, delay: Duration },
    /// A reconnect attempt succeeded; the counter has been reset.
    Reconnected,
    /// `max_attempts` reached; carries the last error.
    GaveUp { error: String },
}

/// Shared observation channels between the supervisor and callers.
pub(crate) struct ReconnectSignals {
    pub state_tx: watch::Sender<ReconnectState>,
    pub events_tx: broadcast::Sender<ReconnectEvent>,
}

impl ReconnectSignals {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ReconnectState::Disconnected);
        let (events_tx, _) = broadcast::channel(32);
        Self { state_tx, events_tx }
    }

    pub fn set_state(&self, state: ReconnectState) {
        let _ = self.state_tx.send(state);
    }

    pub fn emit(&self, event: ReconnectEvent) {
        let _ = self.events_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(initial_ms: u64, max_ms: u64, multiplier: f64) -> ReconnectOptions {
        ReconnectOptions {
            enabled: true,
            max_attempts: 0,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            backoff_multiplier: multiplier,
        }
    }

    #[test]
    fn attempt_zero_waits_the_initial_delay() {
        let opts = options(100, 10_000, 2.0);
        assert_eq!(opts.delay_for_attempt(0), Duration::from_millis(100));
    }

    #[test]
    fn schedule_is_non_decreasing_and_capped() {
        let opts = options(100, 1_500, 2.0);
        let mut previous = Duration::ZERO;
        for attempt in 0..20 {
            let delay = opts.delay_for_attempt(attempt);
            assert!(delay >= previous, "attempt {attempt} decreased");
            assert!(delay <= opts.max_delay);
            previous = delay;
        }
        assert_eq!(opts.delay_for_attempt(19), Duration::from_millis(1_500));
    }

    #[test]
    fn multiplier_one_is_a_fixed_delay() {
        let opts = options(250, 10_000, 1.0);
        for attempt in 0..10 {
            assert_eq!(opts.delay_for_attempt(attempt), Duration::from_millis(250));
        }
    }

    #[test]
    fn sub_one_multiplier_is_clamped_and_flagged() {
        let opts = options(100, 1_000, 0.5);
        // Clamped at runtime so the schedule still never decreases.
        assert_eq!(opts.delay_for_attempt(3), Duration::from_millis(100));
        assert!(!opts.validate().is_empty());
    }

    #[test]
    fn default_options_validate_clean() {
        assert!(ReconnectOptions::default().validate().is_empty());
    }
}
