//! Application layer: the broker and the two loops it runs.
//!
//! # How the pieces fit together
//!
//! ```text
//!  Channel::send ──► outbound queue ──► SenderLoop ──POST──► peer
//!                                          ▲
//!                                   SessionGate (opened by the first good GET)
//!                                          │
//!  receiver ◄── DispatchExecutor ◄── PollerLoop ◄──GET (long-poll)── peer
//! ```
//!
//! - **`broker`** – [`Broker`] and [`BrokerBuilder`]: wiring and lifecycle.
//! - **`channel`** – [`Channel`], [`Envelope`], [`SendError`], and the
//!   [`MessageReceiver`] callback trait.
//! - **`sender`** / **`poller`** – the two long-lived tokio tasks.
//! - **`session`** – the gate that keeps the sender idle until the first poll
//!   succeeds.
//! - **`dispatch`** – where receiver callbacks run.
//! - **`shutdown`** – the stop signal both loops watch.
//! - **`stats`** – traffic counters.

pub mod broker;
pub mod channel;
pub mod dispatch;
pub(crate) mod endpoint;
pub(crate) mod poller;
pub(crate) mod sender;
pub(crate) mod session;
pub(crate) mod shutdown;
pub mod stats;

pub use broker::{Broker, BrokerBuilder, BrokerError, BrokerSettings};
pub use channel::{Channel, Envelope, FailureCallback, MessageReceiver, SendError};
pub use dispatch::{DispatchError, DispatchExecutor, DispatchTask, ThreadExecutor};
pub use stats::{BrokerStats, StatsSnapshot};
