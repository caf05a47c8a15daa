//! Shared retry loop with exponential backoff.
//!
//! Used by the E-utilities executor, directory listings and file transfers so
//! that every remote operation follows the same policy: only errors for which
//! [`GeoError::is_retryable`] holds are attempted again, waiting
//! `base_delay * 2^n` (capped at `max_delay`) before retry `n + 1`.

use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::error::GeoError;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0-based): 1s, 2s, 4s with defaults.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.min(20);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Seam over the backoff wait, so tests can observe delays without sleeping.
pub trait Sleeper {
    fn sleep(&self, delay: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) {
        thread::sleep(delay);
    }
}

/// Runs `op` until it succeeds, fails permanently, or the budget is spent.
///
/// `op` receives the 1-based attempt number.
pub fn run<T, S, F>(policy: &RetryPolicy, sleeper: &S, label: &str, mut op: F) -> Result<T, GeoError>
where
    S: Sleeper + ?Sized,
    F: FnMut(u32) -> Result<T, GeoError>,
{
    let mut attempt = 1u32;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => {
                if attempt > policy.max_retries {
                    return Err(GeoError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                let delay = policy.delay_for(attempt - 1);
                warn!(
                    operation = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying"
                );
                sleeper.sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
