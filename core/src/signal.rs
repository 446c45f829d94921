//! One-shot broadcast cancellation signal.
//!
//! Background monitors and the streaming endpoint are cancelled by closing a
//! notifier; any number of tasks may wait on the same notifier concurrently.
//! Closing is latched: the first `close` wins, later calls are no-ops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Broadcast-on-close cancellation signal.
#[derive(Clone, Debug, Default)]
pub struct CloseNotifier {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    closed: AtomicBool,
    notify: Notify,
}

impl CloseNotifier {
    /// Create an open notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the notifier, waking every current and future waiter.
    ///
    /// Returns `true` if this call performed the close. A second close is
    /// latched to a no-op.
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("close notifier already closed");
            return false;
        }
        self.inner.notify.notify_waiters();
        true
    }

    /// Whether the notifier has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Wait until the notifier is closed. Returns immediately if it already is.
    pub async fn wait(&self) {
        // Register interest before checking the flag so a concurrent close
        // between the check and the await cannot lose the wakeup.
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_after_close_returns_immediately() {
        let notifier = CloseNotifier::new();
        assert!(notifier.close());
        notifier.wait().await;
        assert!(notifier.is_closed());
    }

    #[tokio::test]
    async fn test_close_wakes_multiple_waiters() {
        let notifier = CloseNotifier::new();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let n = notifier.clone();
            handles.push(tokio::spawn(async move {
                n.wait().await;
            }));
        }

        // Give the waiters a chance to register.
        tokio::time::sleep(Duration::from_millis(10)).await;
        notifier.close();

        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("waiter did not wake")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_double_close_is_latched() {
        let notifier = CloseNotifier::new();
        assert!(notifier.close());
        assert!(!notifier.close());
        assert!(notifier.is_closed());
    }

    #[tokio::test]
    async fn test_not_closed_initially() {
        let notifier = CloseNotifier::new();
        assert!(!notifier.is_closed());
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let notifier = CloseNotifier::new();
        let clone = notifier.clone();
        notifier.close();
        assert!(clone.is_closed());
        clone.wait().await;
    }
}
