//! A minimal cancellation primitive: one root signal, fanned out to every
//! task via cheap clones, built on `tokio::sync::watch` rather than pulling
//! in `tokio-util` for a single boolean flag.

use tokio::sync::watch;

#[derive(Clone)]
pub struct ShutdownSignal(watch::Receiver<bool>);

impl ShutdownSignal {
    /// Resolves once `ShutdownHandle::cancel` has been called. Safe to
    /// select! against repeatedly.
    pub async fn cancelled(&mut self) {
        let _ = self.0.wait_for(|cancelled| *cancelled).await;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

#[derive(Clone)]
pub struct ShutdownHandle(watch::Sender<bool>);

impl ShutdownHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

pub fn shutdown_channel() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle(tx), ShutdownSignal(rx))
}
