//! Process-wide shutdown signal.
//!
//! A [`Shutdown`] is a cheap, cloneable listener handed to every long-running task. The scheduler
//! observes it while sleeping between checks and the orchestrator observes it while waiting
//! between validation polls.

use tokio::sync::watch;

/// Sending half of the shutdown signal. Dropping it without calling [`ShutdownTrigger::trigger`]
/// does *not* count as a shutdown request.
#[derive(Debug)]
pub struct ShutdownTrigger(watch::Sender<bool>);

impl ShutdownTrigger {
    pub fn trigger(&self) {
        // Ignored when every listener is already gone.
        let _ = self.0.send(true);
    }
}

#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    #[must_use]
    pub fn channel() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger(tx), Shutdown { rx })
    }

    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown has been requested. Pends forever if the trigger is dropped
    /// without firing.
    pub async fn requested(&mut self) {
        if *self.rx.borrow_and_update() {
            return;
        }
        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow_and_update() {
                return;
            }
        }
        std::future::pending::<()>().await;
    }
}
