//! Session handshake state shared by the inbound poller and the sender.
//!
//! # What is the session? (for beginners)
//!
//! The broker must not send anything to the remote peer until it has proven
//! that the peer is reachable.  The proof is the first long-poll `GET` that
//! comes back with HTTP 200.  Until then the session is *not established* and
//! every outbound message waits in the queue.
//!
//! # Why three states instead of a bool?
//!
//! A plain `AtomicBool` would work with one poller.  The explicit
//! `Establishing` state lets exactly one caller win the transition (via a
//! single compare-and-set) and record the session id *before* anyone can
//! observe `Established`.  Readers therefore never see an established session
//! without an id.
//!
//! # Thread safety
//!
//! The state lives in an `AtomicU8`.  Writers use `AcqRel` on the
//! compare-and-set and `Release` on the final store; readers use `Acquire`.
//! That pairing guarantees that a reader which sees `Established` also sees
//! the id written before it.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

/// The three phases of the session handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// No GET has succeeded yet.
    NotEstablished = 0,
    /// A poller won the transition and is recording the session id.
    Establishing = 1,
    /// The session is live; outbound traffic may flow.
    Established = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Establishing,
            2 => SessionState::Established,
            _ => SessionState::NotEstablished,
        }
    }
}

/// Lock-free, write-once session state.
///
/// Created empty; transitions to [`SessionState::Established`] at most once;
/// never resets.
///
/// # Examples
///
/// ```rust
/// use broker_core::{SessionCell, SessionState};
///
/// let cell = SessionCell::new();
/// assert!(!cell.is_established());
///
/// assert!(cell.try_establish("sess-1"));
/// assert!(!cell.try_establish("sess-2"), "second attempt loses");
/// assert_eq!(cell.id(), Some("sess-1"));
/// assert_eq!(cell.state(), SessionState::Established);
/// ```
#[derive(Debug, Default)]
pub struct SessionCell {
    state: AtomicU8,
    id: OnceLock<String>,
}

impl SessionCell {
    /// Creates a cell in the [`SessionState::NotEstablished`] state.
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::NotEstablished as u8),
            id: OnceLock::new(),
        }
    }

    /// Returns the current handshake state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns `true` once the session is fully established.
    pub fn is_established(&self) -> bool {
        self.state() == SessionState::Established
    }

    /// Returns the session id, or `None` before establishment completes.
    pub fn id(&self) -> Option<&str> {
        if self.is_established() {
            self.id.get().map(String::as_str)
        } else {
            None
        }
    }

    /// Attempts the one-time `NotEstablished → Established` transition.
    ///
    /// Returns `true` if this call performed the transition, `false` if the
    /// session was already established (or another caller is establishing it).
    /// Calling it repeatedly is harmless.
    pub fn try_establish(&self, id: impl Into<String>) -> bool {
        let won = self
            .state
            .compare_exchange(
                SessionState::NotEstablished as u8,
                SessionState::Establishing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if !won {
            return false;
        }

        // Only the winner reaches here, so the OnceLock is always empty.
        let _ = self.id.set(id.into());
        self.state
            .store(SessionState::Established as u8, Ordering::Release);
        true
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
