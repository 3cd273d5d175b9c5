use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// One-shot, level-triggered signal: once fired, every present and future
/// waiter returns immediately.
#[derive(Debug, Default)]
pub struct StopSignal {
    fired: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        self.fired.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent `fire` cannot be missed.
            notified.as_mut().enable();
            if self.is_fired() {
                return;
            }
            notified.await;
        }
    }
}

/// Signals the controller sends to one VU.
#[derive(Debug, Default)]
pub struct VuSignals {
    /// Finish the current iteration, then exit.
    pub retire: StopSignal,
    /// Abandon the current iteration now.
    pub force: StopSignal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_after_fire() {
        let signal = Arc::new(StopSignal::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };
        tokio::task::yield_now().await;
        assert!(!signal.is_fired());

        signal.fire();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap_or_else(|_| panic!("waiter was not woken"))
            .unwrap_or_else(|e| panic!("{e}"));
    }

    #[tokio::test]
    async fn wait_after_fire_is_immediate() {
        let signal = StopSignal::new();
        signal.fire();
        tokio::time::timeout(Duration::from_millis(100), signal.wait())
            .await
            .unwrap_or_else(|_| panic!("fired signal should not block"));
    }
}
