// Retry strategy with exponential backoff and jitter
// Terminal and cancelled errors stop the loop immediately; only transient
// failures consume attempts.

use crate::errors::{Classify, ErrorClass};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Exponential backoff policy for one pipeline step.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Multiplier applied per attempt.
    pub factor: u32,
    /// Upper bound on any single delay.
    pub cap: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Jitter factor (0.0 to 1.0) added on top of each delay.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            factor: 2,
            cap: Duration::from_secs(300),
            max_attempts: 3,
            jitter: 0.1,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0-based), or None once the
    /// attempt budget is spent.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt + 1 >= self.max_attempts {
            return None;
        }

        let base = self
            .initial
            .saturating_mul(self.factor.saturating_pow(attempt))
            .min(self.cap);

        Some(self.add_jitter(base))
    }

    fn add_jitter(&self, base: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return base;
        }
        let jitter_range_ms = (base.as_millis() as f64 * self.jitter) as u64;
        if jitter_range_ms == 0 {
            return base;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=jitter_range_ms);
        base + Duration::from_millis(jitter_ms)
    }
}

/// Run `op` under the policy, sleeping between transient failures.
///
/// Returns the first terminal error as-is, and the last transient error once
/// attempts are exhausted. Cancellation during a backoff sleep surfaces the
/// operation's own cancelled error on the next attempt.
pub async fn run_with_backoff<T, E, F, Fut>(
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<T, E>
where
    E: Classify + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if err.class() != ErrorClass::Retryable {
                    return Err(err);
                }
                let Some(delay) = policy.next_delay(attempt) else {
                    warn!(step = label, attempts = attempt + 1, error = %err, "Retry budget exhausted");
                    return Err(err);
                };
                warn!(step = label, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %err, "Step failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {}
                }
                attempt += 1;
            }
        }
    }
}
