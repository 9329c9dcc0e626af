//! Counting semaphore bounding concurrent pipelines.
//!
//! Uses `Mutex + Condvar` from std — no external dependencies.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::cancel::CancelToken;

/// Poll interval while blocked so a queued thread notices cancellation.
const ACQUIRE_POLL: Duration = Duration::from_millis(100);

/// A counting semaphore that limits concurrent access to a shared resource.
pub struct Semaphore {
    state: Mutex<usize>,
    cond: Condvar,
}

/// RAII guard that releases one permit on drop.
pub struct SemaphoreGuard<'a>(&'a Semaphore);

impl Semaphore {
    /// Create a semaphore with `permits` initial permits.
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(permits),
            cond: Condvar::new(),
        }
    }

    /// Block until a permit is available, then acquire it.
    pub fn acquire(&self) -> SemaphoreGuard<'_> {
        let mut count = self.state.lock().unwrap();
        while *count == 0 {
            count = self.cond.wait(count).unwrap();
        }
        *count -= 1;
        SemaphoreGuard(self)
    }

    /// Block until a permit is available or the token is cancelled.
    ///
    /// Returns None if cancellation won the race; the caller holds no permit.
    pub fn acquire_or_cancel(&self, cancel: &CancelToken) -> Option<SemaphoreGuard<'_>> {
        let mut count = self.state.lock().unwrap();
        while *count == 0 {
            if cancel.is_cancelled() {
                return None;
            }
            let (guard, _timeout) = self.cond.wait_timeout(count, ACQUIRE_POLL).unwrap();
            count = guard;
        }
        if cancel.is_cancelled() {
            return None;
        }
        *count -= 1;
        Some(SemaphoreGuard(self))
    }
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        let mut count = self.0.state.lock().unwrap();
        *count += 1;
        self.0.cond.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn acquire_and_release() {
        let sem = Semaphore::new(2);
        let _g1 = sem.acquire();
        let _g2 = sem.acquire();
        assert_eq!(*sem.state.lock().unwrap(), 0);
        drop(_g1);
        assert_eq!(*sem.state.lock().unwrap(), 1);
    }

    #[test]
    fn blocking_acquire() {
        let sem = Arc::new(Semaphore::new(1));
        let guard = sem.acquire();

        let sem2 = sem.clone();
        let handle = std::thread::spawn(move || {
            let _g = sem2.acquire();
            42
        });

        // Give thread time to block
        std::thread::sleep(Duration::from_millis(50));
        drop(guard); // release → unblock the other thread

        assert_eq!(handle.join().unwrap(), 42);
    }

    #[test]
    fn acquire_or_cancel_returns_none_when_cancelled() {
        let sem = Arc::new(Semaphore::new(1));
        let _held = sem.acquire();

        let cancel = CancelToken::new();
        let sem2 = sem.clone();
        let cancel2 = cancel.clone();
        let handle = std::thread::spawn(move || sem2.acquire_or_cancel(&cancel2).is_none());

        std::thread::sleep(Duration::from_millis(50));
        cancel.cancel();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn acquire_or_cancel_succeeds_with_free_permit() {
        let sem = Semaphore::new(1);
        let cancel = CancelToken::new();
        assert!(sem.acquire_or_cancel(&cancel).is_some());
    }
}
