//! Domain module containing pure, I/O-free broker state.

pub mod session;

pub use session::{SessionCell, SessionState};
