//   Copyright 2025 The Lumen Project
//   SPDX-License-Identifier: BSD-3-Clause

use tokio::sync::watch;

/// Trigger for shutdowns.
///
/// Use `to_signal` to create a `ShutdownSignal` which resolves when `Shutdown` is triggered.
/// All signals resolve, including clones made before or after the trigger.
///
/// _Note_: This triggers when dropped, so the `Shutdown` instance should be held as
/// long as required by the application.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Trigger the shutdown. Idempotent.
    pub fn trigger(&mut self) {
        // send_replace never fails, even with no live receivers
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn to_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Shutdown {
    fn drop(&mut self) {
        self.trigger();
    }
}

/// Receiver end of a shutdown signal. Once resolved the consumer should shut down.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the shutdown signal to trigger. Returns immediately if it already has.
    pub async fn wait(&mut self) {
        // The sender is held by Shutdown which triggers on drop, so a closed
        // channel is equivalent to a trigger.
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}

#[cfg(test)]
mod test {
    use tokio::task;

    use super::*;

    #[tokio::test]
    async fn trigger() {
        let mut shutdown = Shutdown::new();
        let mut signal = shutdown.to_signal();
        assert!(!shutdown.is_triggered());
        let fut = task::spawn(async move {
            signal.wait().await;
        });
        shutdown.trigger();
        assert!(shutdown.is_triggered());
        // Shutdown::trigger is idempotent
        shutdown.trigger();
        assert!(shutdown.is_triggered());
        fut.await.unwrap();
    }

    #[tokio::test]
    async fn signal_clone() {
        let mut shutdown = Shutdown::new();
        let mut signal = shutdown.to_signal();
        let mut signal_clone = signal.clone();
        let fut = task::spawn(async move {
            signal_clone.wait().await;
            signal.wait().await;
        });
        shutdown.trigger();
        fut.await.unwrap();
    }

    #[tokio::test]
    async fn drop_trigger() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.to_signal();
        let mut signal_clone = signal.clone();
        let fut = task::spawn(async move {
            signal_clone.wait().await;
            signal.wait().await;
        });
        drop(shutdown);
        fut.await.unwrap();
    }

    #[tokio::test]
    async fn late_subscriber_resolves() {
        let mut shutdown = Shutdown::new();
        shutdown.trigger();
        let mut signal = shutdown.to_signal();
        assert!(signal.is_triggered());
        signal.wait().await;
    }
}
