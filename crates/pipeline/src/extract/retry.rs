//! Bounded retry with exponential backoff, modelled as a state machine.
//!
//! ```text
//!            transient, retries left
//! Attempting ───────────────────────► BackingOff
//!   │  ▲                                  │
//!   │  └────────── delay elapsed ─────────┘
//!   ├── ok ─────────────────► Succeeded
//!   ├── permanent ──────────► FailedPermanent
//!   └── transient, none left ► FailedTransientExhausted
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry limits for extraction calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `initial × 2^(retry-1)`,
    /// capped at `max_backoff_ms`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(63);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Total number of attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Result of one attempt as seen by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Transient,
    Permanent,
}

/// Where a retried call currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Attempt number `attempt` (0-based) is in flight.
    Attempting { attempt: u32 },
    /// Waiting `delay` before retry number `retry`.
    BackingOff { retry: u32, delay: Duration },
    Succeeded { retries: u32 },
    FailedTransientExhausted { attempts: u32 },
    FailedPermanent { attempts: u32 },
}

impl RetryState {
    pub fn start() -> Self {
        Self::Attempting { attempt: 0 }
    }

    /// Apply the outcome of the in-flight attempt.
    ///
    /// Outside `Attempting` the state is returned unchanged.
    pub fn on_outcome(self, outcome: AttemptOutcome, policy: &RetryPolicy) -> Self {
        let Self::Attempting { attempt } = self else {
            return self;
        };

        match outcome {
            AttemptOutcome::Success => Self::Succeeded { retries: attempt },
            AttemptOutcome::Permanent => Self::FailedPermanent {
                attempts: attempt + 1,
            },
            AttemptOutcome::Transient if attempt < policy.max_retries => {
                let retry = attempt + 1;
                Self::BackingOff {
                    retry,
                    delay: policy.backoff(retry),
                }
            }
            AttemptOutcome::Transient => Self::FailedTransientExhausted {
                attempts: attempt + 1,
            },
        }
    }

    /// The backoff delay has elapsed; start the next attempt.
    pub fn on_backoff_elapsed(self) -> Self {
        match self {
            Self::BackingOff { retry, .. } => Self::Attempting { attempt: retry },
            other => other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::FailedTransientExhausted { .. } | Self::FailedPermanent { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy(10);
        let delays: Vec<u64> = (1..=6).map(|r| p.backoff(r).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
        assert_eq!(p.backoff(200), Duration::from_millis(1_000));
    }

    #[test]
    fn test_three_timeouts_then_success() {
        let p = policy(5);
        let mut state = RetryState::start();
        for expected_retry in 1..=3 {
            state = state.on_outcome(AttemptOutcome::Transient, &p);
            assert!(matches!(state, RetryState::BackingOff { retry, .. } if retry == expected_retry));
            state = state.on_backoff_elapsed();
        }
        state = state.on_outcome(AttemptOutcome::Success, &p);
        assert_eq!(state, RetryState::Succeeded { retries: 3 });
        assert!(state.is_terminal());
    }

    #[test]
    fn test_transient_exhausts_budget() {
        let p = policy(2);
        let mut state = RetryState::start();
        let mut attempts = 0;
        while !state.is_terminal() {
            attempts += 1;
            state = state.on_outcome(AttemptOutcome::Transient, &p).on_backoff_elapsed();
        }
        assert_eq!(attempts, 3);
        assert_eq!(state, RetryState::FailedTransientExhausted { attempts: 3 });
    }

    #[test]
    fn test_permanent_stops_immediately() {
        let p = policy(5);
        let state = RetryState::start()
            .on_outcome(AttemptOutcome::Transient, &p)
            .on_backoff_elapsed()
            .on_outcome(AttemptOutcome::Permanent, &p);
        assert_eq!(state, RetryState::FailedPermanent { attempts: 2 });
    }

    #[test]
    fn test_zero_retries() {
        let state = RetryState::start().on_outcome(AttemptOutcome::Transient, &policy(0));
        assert_eq!(state, RetryState::FailedTransientExhausted { attempts: 1 });
    }

    #[test]
    fn test_terminal_states_ignore_events() {
        let p = policy(1);
        let done = RetryState::Succeeded { retries: 0 };
        assert_eq!(done.on_outcome(AttemptOutcome::Transient, &p), done);
        assert_eq!(done.on_backoff_elapsed(), done);
    }
}
