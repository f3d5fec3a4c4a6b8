//! Bounded exponential backoff for pipeline stages
//!
//! Transient infrastructure faults are retried with escalating patience;
//! fatal faults (see [`PipelineError::is_fatal`]) abort immediately.

use super::PipelineError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Retry policy: exponential backoff with an interval cap, a total time
/// budget, and an attempt budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub maximum_interval: Duration,
    pub total_timeout: Duration,
    pub maximum_attempts: u32,
}

impl RetryPolicy {
    /// Policy for read-only inspection calls.
    pub const fn read_only() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(10),
            total_timeout: Duration::from_secs(30),
            maximum_attempts: 5,
        }
    }

    /// Policy for mutating stage activities (produce, publish).
    pub const fn mutating() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(30),
            total_timeout: Duration::from_secs(60),
            maximum_attempts: 5,
        }
    }

    /// Policy for the secondary merge execution: a long overall budget with
    /// a small attempt count.
    pub const fn merge_job() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(60),
            total_timeout: Duration::from_secs(600),
            maximum_attempts: 3,
        }
    }

    /// Backoff interval to sleep after the given 1-based attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs =
            self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        Duration::from_secs_f64(secs.min(self.maximum_interval.as_secs_f64()))
    }

    /// Run `op` until it succeeds, fails fatally, or exhausts this policy.
    pub async fn run<T, F, Fut>(&self, stage: &str, mut op: F) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    if attempt >= self.maximum_attempts {
                        warn!(stage, attempt, error = %e, "attempt budget exhausted");
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    if started.elapsed() + delay >= self.total_timeout {
                        warn!(stage, attempt, error = %e, "retry time budget exhausted");
                        return Err(e);
                    }

                    warn!(
                        stage,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient fault, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
