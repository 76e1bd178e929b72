//! Exponential-backoff retry with jitter and a caller-supplied predicate.
//!
//! The predicate gates every retry; the social gateway's default predicate
//! refuses to retry while the breaker is not CLOSED, so circuit rejections
//! surface on the first attempt without consuming the retry budget.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::clock::Clock;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
        }
    }
}

pub struct RetryEngine {
    config: RetryConfig,
    clock: Arc<dyn Clock>,
}

impl RetryEngine {
    pub fn new(config: RetryConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    /// Runs `op` up to `max_retries + 1` times, sleeping between attempts.
    pub async fn execute<T, E, F, Fut, P>(&self, mut op: F, should_retry: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.config.max_retries || !should_retry(&err) {
                        return Err(err);
                    }
                    let delay = self.backoff_delay(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "operation failed, backing off before retry"
                    );
                    self.clock.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// `min(initial · factor^attempt + jitter, max)` with uniform jitter in
    /// [0, 1000] ms.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.initial_delay.as_secs_f64() * self.config.factor.powi(attempt as i32);
        let jitter_ms: u64 = rand::thread_rng().gen_range(0..=1000);
        let with_jitter = base + jitter_ms as f64 / 1000.0;
        Duration::from_secs_f64(with_jitter.min(self.config.max_delay.as_secs_f64()))
    }
}
