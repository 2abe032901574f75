//! Session gate: holds the sender back until the first poll succeeds.
//!
//! [`SessionCell`] answers "is the session established?" without locking.
//! The sender, however, needs to *sleep* until the answer becomes yes.  The
//! gate pairs the cell with a `watch` channel that flips to `true` right after
//! the winning transition, so waiting is a plain `.await`.

use broker_core::SessionCell;
use tokio::sync::watch;

use super::shutdown::wait_until_set;

/// The handshake latch shared by the poller (writer) and the sender (reader).
#[derive(Debug)]
pub(crate) struct SessionGate {
    cell: SessionCell,
    opened: watch::Sender<bool>,
}

impl SessionGate {
    pub(crate) fn new() -> Self {
        let (opened, _) = watch::channel(false);
        Self {
            cell: SessionCell::new(),
            opened,
        }
    }

    /// Establishes the session with `id` unless it is already established.
    ///
    /// Returns `true` for the single call that performed the transition.
    pub(crate) fn establish(&self, id: impl Into<String>) -> bool {
        if self.cell.try_establish(id) {
            self.opened.send_replace(true);
            true
        } else {
            false
        }
    }

    pub(crate) fn is_established(&self) -> bool {
        self.cell.is_established()
    }

    pub(crate) fn id(&self) -> Option<String> {
        self.cell.id().map(str::to_owned)
    }

    /// Resolves once the session is established.
    pub(crate) async fn wait_established(&self) {
        let mut rx = self.opened.subscribe();
        wait_until_set(&mut rx).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
