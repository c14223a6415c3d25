// ~/src/retry.rs

use std::{thread, time::Duration};

use tracing::{debug, warn};

use crate::{
    error::{error_chain_text, FetchError},
    DEBUG_NAME,
};

/// Error signatures worth another attempt. Matched case-insensitively
/// anywhere in the error's full source chain.
pub const DEFAULT_RETRYABLE: &[&str] = &[
    "no such host",
    "failed to lookup address",
    "dns error",
    "connection refused",
    "actively refused",
    "connection reset",
    "timeout",
    "timed out",
];

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub retryable: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            retryable: DEFAULT_RETRYABLE.iter().map(|s| s.to_string()).collect(),
        }
    }
}

pub trait Sleeper {
    fn sleep(&mut self, delay: Duration);
}

/// Blocks the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, delay: Duration) {
        thread::sleep(delay);
    }
}

impl<F: FnMut(Duration)> Sleeper for F {
    fn sleep(&mut self, delay: Duration) {
        self(delay)
    }
}

impl RetryPolicy {
    pub fn is_retryable(&self, message: &str) -> bool {
        let haystack = message.to_lowercase();
        self.retryable
            .iter()
            .any(|needle| !needle.is_empty() && haystack.contains(&needle.to_lowercase()))
    }

    pub fn next_delay(&self, current: Duration) -> Duration {
        let scaled = current.as_secs_f64() * self.backoff_factor.max(1.0);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    pub fn run<T>(&self, op: impl FnMut(u32) -> Result<T, FetchError>) -> Result<T, FetchError> {
        self.run_with_sleeper(&mut ThreadSleeper, op)
    }

    /// Calls `op` with the 1-based attempt number until it succeeds, fails
    /// with a non-retryable error, or the attempt budget is spent. There is
    /// no sleep after the final attempt.
    pub fn run_with_sleeper<T, S>(
        &self,
        sleeper: &mut S,
        mut op: impl FnMut(u32) -> Result<T, FetchError>,
    ) -> Result<T, FetchError>
    where
        S: Sleeper + ?Sized,
    {
        let attempts = self.max_attempts.max(1);
        let mut delay = self.initial_delay.min(self.max_delay);

        let mut attempt = 1;
        loop {
            let err = match op(attempt) {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "[{}][RETRY] Operation succeeded after retry", DEBUG_NAME);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !self.is_retryable(&err.cause_text()) {
                return Err(FetchError::NonRetryable(Box::new(err)));
            }

            if attempt >= attempts {
                return Err(FetchError::Exhausted {
                    attempts,
                    last: Box::new(err),
                });
            }

            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error_chain_text(&err),
                "[{}][RETRY] Operation failed, retrying", DEBUG_NAME
            );
            sleeper.sleep(delay);
            delay = self.next_delay(delay);
            attempt += 1;
        }
    }
}
