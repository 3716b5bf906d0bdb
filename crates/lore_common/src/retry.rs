//! Exponential backoff for external calls.

use crate::cancel::CancelSignal;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy: `max_attempts` total tries, waiting
/// `base_delay * backoff_multiplier^n` (capped) between them
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    /// ±fraction of each delay drawn at random
    pub jitter_percent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter_percent: 0.0,
        }
    }
}

/// Terminal outcome of a retried operation
#[derive(Debug)]
pub enum RetryError<E> {
    Exhausted { attempts: u32, last: E },
    Cancelled { attempts: u32 },
}

impl RetryPolicy {
    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay after the failure of attempt `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let raw = base_ms * self.backoff_multiplier.powi(attempt as i32);
        let capped = raw.min(self.max_delay.as_millis() as f64);

        let ms = if self.jitter_percent > 0.0 {
            use rand::Rng;
            let range = capped * self.jitter_percent;
            let jitter = rand::thread_rng().gen_range(-range..=range);
            (capped + jitter).max(0.0)
        } else {
            capped
        };
        Duration::from_millis(ms as u64)
    }

    /// Run `op` until it succeeds, attempts run out, or `cancel` fires.
    /// `op` receives the 0-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, cancel: &CancelSignal, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let tried = attempt + 1;
                    if cancel.is_cancelled() {
                        return Err(RetryError::Cancelled { attempts: tried });
                    }
                    if tried >= attempts {
                        warn!(attempts = tried, error = %e, "Retries exhausted");
                        return Err(RetryError::Exhausted { attempts: tried, last: e });
                    }

                    let delay = self.delay_for(attempt);
                    debug!(attempt = tried, ?delay, error = %e, "Attempt failed, backing off");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Err(RetryError::Cancelled { attempts: tried });
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}
