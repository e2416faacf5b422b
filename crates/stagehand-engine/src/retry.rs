//! Bounded retry with a fixed back-off schedule.
//!
//! Sleeping goes through [`Sleeper`] so tests can observe the delays
//! without waiting for them.

use std::future::Future;
use std::time::Duration;

use stagehand_core::error::StagehandError;
use stagehand_core::time::Sleeper;
use thiserror::Error;

/// Attempt budget plus the delay to wait after each failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delays: Vec<Duration>,
}

/// All attempts failed.
#[derive(Debug, Error)]
#[error("{label} failed after {attempts} attempt(s): {last_error}")]
pub struct RetryError {
    pub label: String,
    pub attempts: u32,
    pub last_error: StagehandError,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delays: Vec<Duration>) -> Self {
        Self { max_attempts: max_attempts.max(1), delays }
    }

    /// Stage-advance calls: 3 attempts, 2s then 4s between them.
    pub fn advancement() -> Self {
        Self::from_secs(3, &[2, 4, 8])
    }

    /// Plan/job lookups during reconciliation: 3 attempts, 0.5s then 1s.
    pub fn enrichment() -> Self {
        Self::from_millis(3, &[500, 1000])
    }

    /// Single attempt, no waiting.
    pub fn once() -> Self {
        Self::new(1, Vec::new())
    }

    pub fn from_secs(max_attempts: u32, delays: &[u64]) -> Self {
        Self::new(max_attempts, delays.iter().map(|s| Duration::from_secs(*s)).collect())
    }

    pub fn from_millis(max_attempts: u32, delays: &[u64]) -> Self {
        Self::new(max_attempts, delays.iter().map(|ms| Duration::from_millis(*ms)).collect())
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// Never shorter than an earlier delay; past the end of the list the
    /// last entry repeats.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let idx = (attempt.max(1) - 1) as usize;
        self.delays
            .iter()
            .take(idx + 1)
            .max()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Run `op` until it succeeds or the budget is spent. `op` receives the
    /// 1-based attempt number.
    pub async fn run<T, F, Fut>(
        &self,
        sleeper: &dyn Sleeper,
        label: &str,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = stagehand_core::Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!("🔄 {label} succeeded on attempt {attempt}");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < self.max_attempts => {
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        "⚠️ {label} failed (attempt {}/{}): {e}, retrying in {:?}",
                        attempt,
                        self.max_attempts,
                        delay
                    );
                    sleeper.sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(RetryError {
                        label: label.to_string(),
                        attempts: attempt,
                        last_error: e,
                    });
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::advancement()
    }
}
