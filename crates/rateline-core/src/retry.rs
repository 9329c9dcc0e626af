//! Retry with backoff for per-URL pipeline attempts

use std::time::Duration;

use crate::cancel::CancelToken;

/// Linear-exponential backoff: 2s × attempt (2s, 4s, 6s, ...)
pub const fn backoff_duration(attempt: u32) -> Duration {
    Duration::from_secs(2 * attempt as u64)
}

/// Outcome classification for [`retry_with_backoff`].
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Retry a fallible operation with backoff.
///
/// `attempt_fn` receives the 1-based attempt number and whether this is the
/// final attempt (so callers can switch to a conservative code path). On
/// retryable errors, invokes `on_retry`, sleeps (cancellation-aware), and
/// tries again. Returns the first success, the final error, or the last
/// error when cancellation interrupts the backoff sleep.
pub fn retry_with_backoff<T, E: Retryable>(
    max_attempts: u32,
    cancel: &CancelToken,
    mut attempt_fn: impl FnMut(u32, bool) -> Result<T, E>,
    mut on_retry: impl FnMut(u32, &E, Duration),
) -> Result<T, E> {
    let mut attempt = 1u32;
    loop {
        match attempt_fn(attempt, attempt == max_attempts) {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_attempts && e.is_retryable() && !cancel.is_cancelled() => {
                let delay = backoff_duration(attempt);
                on_retry(attempt, &e, delay);
                if !cancel.sleep(delay) {
                    return Err(e);
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
