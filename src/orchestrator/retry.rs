//! Bounded retry with exponential backoff

use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::config::settings::RetrySettings;
use crate::error::{BackupError, BackupResult};
use crate::transform::CancelToken;

const SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails permanently or runs out of attempts
    ///
    /// `op` receives the attempt number, starting at 1.
    pub fn run<T, F>(&self, token: &CancelToken, mut op: F) -> BackupResult<T>
    where
        F: FnMut(u32) -> BackupResult<T>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    sleep(delay, token)?;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn sleep(delay: Duration, token: &CancelToken) -> BackupResult<()> {
    let mut remaining = delay;
    while !remaining.is_zero() {
        if let Some(reason) = token.reason() {
            return Err(BackupError::Cancelled(reason.to_string()));
        }
        let slice = remaining.min(SLEEP_SLICE);
        thread::sleep(slice);
        remaining -= slice;
    }
    Ok(())
}
