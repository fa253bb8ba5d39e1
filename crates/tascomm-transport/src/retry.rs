use std::io::ErrorKind;
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, TransportError};

/// Bounded retry/backoff applied while (re)opening the transport.
///
/// One call to [`RetryPolicy::run`] makes at most `max_attempts` attempts. The
/// caller owns the outer "try again later" loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per open, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound for the doubling backoff.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff to sleep after the given failed attempt (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails permanently, or the ceiling is hit.
    ///
    /// Only errors classified by [`is_transient`] are retried.
    pub fn run<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if !is_transient(&err) => return Err(err),
                Err(err) if attempt >= max_attempts => {
                    return Err(TransportError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    let backoff = self.backoff_for(attempt);
                    debug!(attempt, ?backoff, error = %err, "transport open failed, retrying");
                    std::thread::sleep(backoff);
                }
            }
        }
    }
}

/// Whether an open failure is worth retrying (peer absent, resource busy).
pub fn is_transient(err: &TransportError) -> bool {
    matches!(
        err.io_kind(),
        Some(
            ErrorKind::NotFound
                | ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::WouldBlock
                | ErrorKind::TimedOut
                | ErrorKind::Interrupted
                | ErrorKind::AddrInUse
                | ErrorKind::ResourceBusy
        )
    )
}
