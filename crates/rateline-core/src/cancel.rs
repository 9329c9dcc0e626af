//! Cooperative cancellation via a shared atomic flag

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Granularity for cancellation-aware sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Cloneable cancellation handle shared by the pool, pipelines, and parser.
///
/// The flag is one-way: once cancelled it stays cancelled. Blocking reads are
/// not interrupted directly; the per-read stall timeout in the stream layer
/// bounds how long a read can outlive cancellation.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Safe to call from a signal handler closure.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Returns true if this call flipped the flag, false if already cancelled.
    /// Lets a signal handler distinguish the first interrupt from the second.
    pub fn cancel_once(&self) -> bool {
        !self.flag.swap(true, Ordering::Relaxed)
    }

    /// Sleep for `dur`, waking early on cancellation.
    ///
    /// Returns false if the token was cancelled before the sleep completed.
    pub fn sleep(&self, dur: Duration) -> bool {
        let deadline = Instant::now() + dur;
        while Instant::now() < deadline {
            if self.is_cancelled() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(remaining.min(SLEEP_SLICE));
        }
        !self.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_not_cancelled() {
        let t = CancelToken::new();
        assert!(!t.is_cancelled());
    }

    #[test]
    fn cancel_is_sticky_and_shared() {
        let t = CancelToken::new();
        let t2 = t.clone();
        t.cancel();
        assert!(t2.is_cancelled());
    }

    #[test]
    fn cancel_once_reports_first_call() {
        let t = CancelToken::new();
        assert!(t.cancel_once());
        assert!(!t.cancel_once());
    }

    #[test]
    fn sleep_returns_early_when_cancelled() {
        let t = CancelToken::new();
        t.cancel();
        let start = Instant::now();
        assert!(!t.sleep(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn sleep_completes_without_cancel() {
        let t = CancelToken::new();
        assert!(t.sleep(Duration::from_millis(10)));
    }
}
