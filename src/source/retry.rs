use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::HarvestError;

/// Outcome of a single request attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    Retry(HarvestError),
    Fail(HarvestError),
}

impl<T> Attempt<T> {
    pub fn and_then<U, F>(self, f: F) -> Attempt<U>
    where
        F: FnOnce(T) -> Attempt<U>,
    {
        match self {
            Attempt::Done(value) => f(value),
            Attempt::Retry(err) => Attempt::Retry(err),
            Attempt::Fail(err) => Attempt::Fail(err),
        }
    }
}

/// Bounded retry with a fixed backoff, plus a pause after every request
/// regardless of its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub rate_limit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
            rate_limit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration, rate_limit: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
            rate_limit,
        }
    }

    /// No sleeping at all; for tests and local fixtures.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    pub fn execute<T, F>(&self, label: &str, mut op: F) -> Result<T, HarvestError>
    where
        F: FnMut(u32) -> Attempt<T>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            let outcome = op(attempt);
            self.pace();
            match outcome {
                Attempt::Done(value) => {
                    if attempt > 1 {
                        debug!(request = label, attempt, "request recovered");
                    }
                    return Ok(value);
                }
                Attempt::Fail(err) => return Err(err),
                Attempt::Retry(err) => {
                    warn!(request = label, attempt, max = attempts, error = %err, "transient failure");
                    last_error = Some(err);
                    if attempt < attempts && !self.backoff.is_zero() {
                        thread::sleep(self.backoff);
                    }
                }
            }
        }
        Err(HarvestError::SourceUnavailable {
            attempts,
            message: last_error
                .map(|err| err.to_string())
                .unwrap_or_else(|| "no attempt made".to_string()),
        })
    }

    fn pace(&self) {
        if !self.rate_limit.is_zero() {
            thread::sleep(self.rate_limit);
        }
    }
}
