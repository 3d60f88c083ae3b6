//! Cooperative shutdown
//!
//! A cloneable stop flag that blocking waits can observe, and the `Sleeper`
//! seam the loop and reconnector wait through so tests never sleep.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Shared stop request
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    /// Create an un-triggered signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every waiter
    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        let mut stopped = lock.lock().unwrap_or_else(|e| e.into_inner());
        *stopped = true;
        cvar.notify_all();
    }

    /// Whether shutdown was requested
    pub fn is_stopped(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait up to `timeout`; returns `true` as soon as shutdown is requested
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }
}

/// Interruptible delay
pub trait Sleeper: Send + Sync {
    /// Wait for `duration` unless `stop` fires first; returns `true` if stopped
    fn sleep(&self, duration: Duration, stop: &StopSignal) -> bool;
}

/// Real-time sleeper backed by the stop signal's condition variable
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSleeper;

impl Sleeper for SystemSleeper {
    fn sleep(&self, duration: Duration, stop: &StopSignal) -> bool {
        if duration.is_zero() {
            return stop.is_stopped();
        }
        stop.wait_timeout(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_signal_starts_clear() {
        let stop = StopSignal::new();
        assert!(!stop.is_stopped());
        assert!(!stop.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_trigger_wakes_sleeper() {
        let stop = StopSignal::new();
        let remote = stop.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.trigger();
        });

        let start = Instant::now();
        assert!(SystemSleeper.sleep(Duration::from_secs(30), &stop));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_already_stopped_returns_immediately() {
        let stop = StopSignal::new();
        stop.trigger();
        assert!(SystemSleeper.sleep(Duration::from_secs(30), &stop));
        assert!(SystemSleeper.sleep(Duration::ZERO, &stop));
    }
}
