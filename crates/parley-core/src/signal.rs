//! Shared termination signal
//!
//! A [`Signal`] is a one-shot flag shared by every loop that takes part in a
//! session. Once set it stays set, and every waiter parked in
//! [`Signal::wait`] is woken immediately through [`tokio::sync::Notify`].
//! Threads outside the runtime check [`Signal::is_set`] between blocking calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    flag: AtomicBool,
    notify: Notify,
}

/// Set-once termination signal, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct Signal {
    inner: Arc<Inner>,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assert the signal. Returns `true` only for the call that set it.
    pub fn set(&self) -> bool {
        if self.inner.flag.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.inner.notify.notify_waiters();
        true
    }

    pub fn is_set(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Wait asynchronously until the signal is set
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent `set` cannot slip between.
            notified.as_mut().enable();

            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_set_is_one_shot() {
        let signal = Signal::new();
        assert!(!signal.is_set());
        assert!(signal.set());
        assert!(!signal.set());
        assert!(signal.is_set());
    }

    #[test]
    fn test_clones_share_state() {
        let signal = Signal::new();
        let other = signal.clone();
        other.set();
        assert!(signal.is_set());
    }

    #[tokio::test]
    async fn test_async_waiters_wake_on_set() {
        let signal = Signal::new();
        let mut waiters = Vec::new();
        for _ in 0..4 {
            let signal = signal.clone();
            waiters.push(tokio::spawn(async move { signal.wait().await }));
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.set();

        for waiter in waiters {
            timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter should wake within timeout")
                .expect("waiter task should not panic");
        }
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_already_set() {
        let signal = Signal::new();
        signal.set();
        timeout(Duration::from_millis(50), signal.wait())
            .await
            .expect("wait on a set signal should not block");
    }
}
