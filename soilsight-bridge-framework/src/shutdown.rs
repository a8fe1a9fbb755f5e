//! Termination signal handling.
//!
//! SIGINT and SIGTERM are turned into a [`ShutdownSignal`] that long-running
//! loops check between cycles and select against while sleeping.

use tokio::sync::watch;

/// Fires the paired [`ShutdownSignal`]s.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Cloneable view of the process shutdown state.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// True once shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when shutdown is requested.
    ///
    /// Never resolves if the trigger is dropped without firing.
    pub async fn triggered(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Create a manually driven trigger/signal pair.
pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

/// Install SIGINT/SIGTERM handlers and return the signal they fire.
///
/// Must be called from within a Tokio runtime.
pub fn listen_for_signals() -> std::io::Result<ShutdownSignal> {
    let (trigger, signal) = channel();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;

        tokio::spawn(async move {
            let name = tokio::select! {
                _ = interrupt.recv() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
            };
            tracing::info!(signal = name, "Received shutdown signal");
            trigger.trigger();
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }
            tracing::info!(signal = "ctrl-c", "Received shutdown signal");
            trigger.trigger();
        });
    }

    Ok(signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_trigger_is_observed_by_clones() {
        let (trigger, signal) = channel();
        let clone = signal.clone();

        assert!(!signal.is_triggered());
        trigger.trigger();
        trigger.trigger();
        assert!(signal.is_triggered());
        assert!(clone.is_triggered());
    }

    #[test]
    fn test_triggered_pending_until_fired() {
        let (trigger, mut signal) = channel();
        let mut fut = tokio_test::task::spawn(signal.triggered());

        tokio_test::assert_pending!(fut.poll());
        trigger.trigger();
        assert!(fut.is_woken());
        tokio_test::assert_ready!(fut.poll());
    }

    #[tokio::test]
    async fn test_triggered_resolves() {
        let (trigger, mut signal) = channel();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.trigger();
        });

        tokio::time::timeout(Duration::from_secs(1), signal.triggered())
            .await
            .expect("shutdown should be observed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trigger_never_fires() {
        let (trigger, mut signal) = channel();
        drop(trigger);

        let result = tokio::time::timeout(Duration::from_secs(5), signal.triggered()).await;
        assert!(result.is_err());
        assert!(!signal.is_triggered());
    }
}
