//! Cooperative cancellation for a running loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A cloneable flag the UI raises to stop the loop at its next checkpoint.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Resolve once the flag is raised.
    pub async fn interrupted(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_interrupted() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wakes_waiters() {
        let handle = InterruptHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.interrupted().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!task.is_finished());
        handle.interrupt();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(handle.is_interrupted());

        handle.reset();
        assert!(!handle.is_interrupted());
    }

    #[tokio::test]
    async fn already_raised_resolves_immediately() {
        let handle = InterruptHandle::new();
        handle.interrupt();
        tokio::time::timeout(Duration::from_millis(100), handle.interrupted())
            .await
            .unwrap();
    }
}
