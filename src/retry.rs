// src/retry.rs
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backoff {
    /// Wait the same amount between every attempt.
    Fixed(Duration),
    /// Start at `initial`, double each time, never exceed `max`.
    Exponential { initial: Duration, max: Duration },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Fixed(Duration::from_secs(1)),
            max_jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    fn wait_after(&self, attempt_number: u32) -> Duration {
        let base = match self.backoff {
            Backoff::Fixed(wait) => wait,
            Backoff::Exponential { initial, max } => {
                let factor = 1u32.checked_shl(attempt_number - 1).unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(max)
            }
        };
        if self.max_jitter.is_zero() {
            return base;
        }
        base + rand::thread_rng().gen_range(Duration::ZERO..self.max_jitter)
    }
}

/// Run `func` until it succeeds or `policy.max_attempts` attempts have failed,
/// returning the last error. No wait follows the final attempt.
pub async fn with_retries<Func, Fut, Out, Err>(
    description: &str,
    func: Func,
    policy: RetryPolicy,
) -> Result<Out, Err>
where
    Func: Fn() -> Fut,
    Fut: Future<Output = Result<Out, Err>>,
    Err: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt_number = 1;
    loop {
        match func().await {
            Ok(out) => return Ok(out),
            Err(error) if attempt_number >= max_attempts => {
                warn!("Failed to {description} (attempt {attempt_number}), giving up: {error}");
                return Err(error);
            }
            Err(error) => {
                warn!("Failed to {description} (attempt {attempt_number}): {error}");
            }
        }
        time::sleep(policy.wait_after(attempt_number)).await;
        attempt_number += 1;
    }
}
