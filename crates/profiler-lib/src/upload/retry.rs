//! Bounded retry budget
//!
//! Each operation kind owns a `RetryBudget`. Failures are counted across
//! calls and the counter is only cleared when the reset period elapses, so a
//! persistently failing endpoint costs at most `max_instant_retries` extra
//! attempts per period instead of retrying forever.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default number of instant retries per reset period
pub const DEFAULT_MAX_INSTANT_RETRIES: u32 = 3;

/// Default reset period (4 hours)
pub const DEFAULT_RESET_PERIOD: Duration = Duration::from_secs(240 * 60);

/// Retry settings shared by the poller and the upload coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed before failures surface immediately
    pub max_instant_retries: u32,
    /// Period after which the failure counter is cleared
    pub reset_period: Duration,
    /// Pause between a failed attempt and its retry
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_instant_retries: DEFAULT_MAX_INSTANT_RETRIES,
            reset_period: DEFAULT_RESET_PERIOD,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// The operation kept failing after the budget ran out
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub error: E,
}

#[derive(Debug)]
struct BudgetState {
    retries_used: u32,
    period_start: Instant,
}

/// Counter-with-periodic-reset retry budget for one operation kind
#[derive(Debug)]
pub struct RetryBudget {
    policy: RetryPolicy,
    state: Mutex<BudgetState>,
}

impl RetryBudget {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(BudgetState {
                retries_used: 0,
                period_start: Instant::now(),
            }),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Retries still available in the current period
    pub fn remaining(&self) -> u32 {
        let mut state = self.lock();
        self.reset_if_elapsed(&mut state);
        self.policy.max_instant_retries.saturating_sub(state.retries_used)
    }

    /// Take one retry from the budget, returning false when none is left
    pub fn try_consume(&self) -> bool {
        let mut state = self.lock();
        self.reset_if_elapsed(&mut state);

        if state.retries_used < self.policy.max_instant_retries {
            state.retries_used += 1;
            true
        } else {
            false
        }
    }

    /// Run `attempt` until it succeeds or the budget is spent
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: &str,
        mut attempt: F,
    ) -> Result<T, Exhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            match attempt().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !self.try_consume() {
                        warn!(
                            operation = %operation,
                            attempts = attempts,
                            error = %error,
                            "Retry budget exhausted"
                        );
                        return Err(Exhausted { attempts, error });
                    }

                    debug!(
                        operation = %operation,
                        attempt = attempts,
                        error = %error,
                        delay_ms = self.policy.retry_delay.as_millis() as u64,
                        "Attempt failed, retrying"
                    );
                    drop(error);
                    tokio::time::sleep(self.policy.retry_delay).await;
                }
            }
        }
    }

    fn reset_if_elapsed(&self, state: &mut BudgetState) {
        if state.period_start.elapsed() >= self.policy.reset_period {
            state.retries_used = 0;
            state.period_start = Instant::now();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
