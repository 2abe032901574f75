//! Infrastructure layer: adapters to the outside world.
//!
//! # Modules
//!
//! - **`transport`** – the [`transport::HttpTransport`] trait the broker talks
//!   through, plus the `reqwest` adapter and the scripted in-memory peer.
//! - **`config`** – TOML configuration file load/save.
//!
//! Nothing in here knows about the session gate or the outbound queue; the
//! application layer drives these adapters.

pub mod config;
pub mod transport;
