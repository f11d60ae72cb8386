//! Retry policy for ledger writes
//!
//! Another program (a spreadsheet, a sync client) may hold the ledger open.
//! Writes are retried on a fixed interval until the file becomes available.

use std::time::Duration;

use super::LedgerError;

/// Default wait between attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(15);

/// Default attempt ceiling (effectively "until available")
pub const DEFAULT_MAX_ATTEMPTS: u32 = 99_999;

/// Bounded wait-and-retry loop around a ledger write
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Wait between attempts
    pub interval: Duration,
    /// Which errors are worth retrying
    pub retryable: fn(&LedgerError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_RETRY_INTERVAL,
            retryable: LedgerError::is_lock_contention,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
            ..Self::default()
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt ceiling is reached. `on_first_failure` fires once, on the
    /// first retryable failure.
    pub async fn run<T, F, N>(&self, mut op: F, on_first_failure: N) -> Result<T, LedgerError>
    where
        F: FnMut() -> Result<T, LedgerError>,
        N: FnOnce(&LedgerError),
    {
        let mut on_first_failure = Some(on_first_failure);
        let mut attempt: u32 = 1;

        loop {
            match op() {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "Ledger write succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if (self.retryable)(&e) && attempt < self.max_attempts => {
                    if let Some(notice) = on_first_failure.take() {
                        notice(&e);
                    }
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        "Ledger unavailable: {}. Retrying in {:?}",
                        e,
                        self.interval
                    );
                    tokio::time::sleep(self.interval).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
