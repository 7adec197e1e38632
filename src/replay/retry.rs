//! Lock-wait retry policy

use std::time::Duration;

use crate::ReplayError;
use crate::config::RetryConfig;

/// How often a statement failing with a lock-wait timeout is re-issued.
///
/// The default retries without limit and without delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed; `None` for no limit
    pub max_attempts: Option<u32>,
    /// Pause between attempts
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Whether another attempt may follow `attempts` failed ones ending in `err`.
    pub fn permits(&self, attempts: u32, err: &ReplayError) -> bool {
        err.is_lock_wait() && self.max_attempts.is_none_or(|max| attempts < max)
    }

    /// Wait out the backoff before the next attempt.
    pub async fn pause(&self) {
        if !self.backoff.is_zero() {
            tokio::time::sleep(self.backoff).await;
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.map(|n| n.max(1)),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}
