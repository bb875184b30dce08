//! Graceful shutdown signalling
//!
//! A `watch` channel carries a single flag. The orchestrator checks it between
//! accounts and races it against the fetch phase.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Sending half; flips the flag once
#[derive(Debug)]
pub struct ShutdownTrigger(watch::Sender<bool>);

/// Receiving half handed to the orchestrator
#[derive(Debug, Clone)]
pub struct ShutdownSignal(watch::Receiver<bool>);

/// Creates a connected trigger and signal
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger(tx), ShutdownSignal(rx))
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        // Nobody listening means nothing left to stop
        let _ = self.0.send(true);
    }
}

impl ShutdownSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self(rx)
    }

    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once shutdown is requested
    ///
    /// If the trigger is dropped without firing, this never resolves.
    pub async fn triggered(&mut self) {
        while !*self.0.borrow_and_update() {
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Spawns a task that fires the trigger on Ctrl-C
pub fn listen_for_ctrl_c(trigger: ShutdownTrigger) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, finishing current account before stopping");
                trigger.trigger();
            }
            Err(e) => warn!(error = %e, "Unable to listen for Ctrl-C"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_waiter() {
        let (trigger, signal) = shutdown_channel();
        assert!(!signal.is_triggered());

        let mut waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.triggered().await });
        trigger.trigger();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_never_does_not_fire() {
        let mut signal = ShutdownSignal::never();
        assert!(!signal.is_triggered());
        let waited = tokio::time::timeout(Duration::from_millis(20), signal.triggered()).await;
        assert!(waited.is_err());
    }
}
