//! One-shot stop signal shared by the broker and its two background tasks.
//!
//! Built on a `tokio::sync::watch` channel holding a `bool`.  The broker keeps
//! the [`ShutdownTrigger`]; each loop owns a cloned [`ShutdownSignal`] and
//! polls [`ShutdownSignal::triggered`] inside `tokio::select!` at every point
//! where it could otherwise wait forever.

use tokio::sync::watch;

/// Creates a connected trigger/signal pair in the "running" state.
pub(crate) fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

/// Owner side of the stop signal.
#[derive(Debug)]
pub(crate) struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Raises the signal.  Returns `true` only for the call that raised it.
    pub(crate) fn trigger(&self) -> bool {
        !self.tx.send_replace(true)
    }
}

/// Observer side of the stop signal.  Cheap to clone.
#[derive(Debug, Clone)]
pub(crate) struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Returns `true` once the trigger has fired.
    pub(crate) fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the trigger has fired; resolves at once if it already has.
    pub(crate) async fn triggered(&mut self) {
        wait_until_set(&mut self.rx).await;
    }
}

/// Resolves once the watched flag is `true`.
///
/// If the sending half is dropped while the flag is still `false`, the future
/// never resolves: nobody is left who could set it.
pub(crate) async fn wait_until_set(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
