use crate::utils::error::{ProxyError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Bounded retry with exponential backoff and jitter.
///
/// Shared by the port allocator (transient store failures) and the endpoint
/// provisioner (failed process verification). Whether a failure is worth
/// another attempt is decided by the classifier passed to [`RetryPolicy::run`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,

    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,

    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,

    /// Jitter factor (0.0 - 1.0).
    pub jitter: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 2000,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, delay_ms: u64) -> Self {
        self.base_delay_ms = delay_ms;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, delay_ms: u64) -> Self {
        self.max_delay_ms = delay_ms;
        self
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: f32) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// No delay between attempts. Used by tests and the dry-run mode.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new()
            .with_max_attempts(max_attempts)
            .with_base_delay(0)
            .with_max_delay(0)
            .with_jitter(0.0)
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if self.base_delay_ms == 0 {
            return Duration::ZERO;
        }

        let exp = attempt.saturating_sub(1).min(16);
        let base = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);

        if self.jitter <= 0.0 || base == 0 {
            return Duration::from_millis(base);
        }

        let spread = (base as f64 * self.jitter as f64) as u64;
        let jittered = if spread == 0 {
            base
        } else {
            let offset = rand::thread_rng().gen_range(0..=spread * 2);
            (base + offset).saturating_sub(spread)
        };
        Duration::from_millis(jittered.min(self.max_delay_ms))
    }

    /// Runs `op` until it succeeds, the classifier rejects the error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut, C>(&self, mut op: F, should_retry: C) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        C: Fn(&ProxyError) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && should_retry(&e) => {
                    let delay = self.delay_after(attempt);
                    tracing::debug!(
                        "Attempt {}/{} failed: {} (retrying in {:?})",
                        attempt,
                        self.max_attempts,
                        e,
                        delay
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
