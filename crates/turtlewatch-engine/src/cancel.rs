use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Shared stop signal that sleepers can wait on.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, signal) = &*self.inner;
        if let Ok(mut cancelled) = lock.lock() {
            *cancelled = true;
        }
        signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.0.lock().map(|cancelled| *cancelled).unwrap_or(true)
    }

    /// Sleeps up to `timeout`, waking early on cancellation. Returns whether
    /// the token is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, signal) = &*self.inner;
        let Ok(guard) = lock.lock() else {
            return true;
        };
        match signal.wait_timeout_while(guard, timeout, |cancelled| !*cancelled) {
            Ok((cancelled, _)) => *cancelled,
            Err(_) => true,
        }
    }
}
