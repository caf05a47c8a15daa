use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

/// Minimum spacing between outbound requests of one client instance.
///
/// The limiter is owned by the client that dispatches requests; two clients
/// do not coordinate with each other.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Blocks until `min_interval` has passed since the previous call returned.
    ///
    /// The timestamp is taken right before returning, so the gap is measured
    /// between dispatches.
    pub fn acquire(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "rate limit wait");
                thread::sleep(wait);
            }
        }
        self.last_request = Some(Instant::now());
    }
}
