//! Where inbound delivery callbacks run.
//!
//! # Why not call the receiver directly? (for beginners)
//!
//! The poller is an async task on the tokio runtime.  Application receivers
//! are ordinary synchronous code that may block, lock a UI, or take a long
//! time.  Running them on the poller would stall the next long-poll and could
//! starve the runtime's worker threads.  Instead the poller wraps each payload
//! in a [`DispatchTask`] and hands it to a [`DispatchExecutor`] chosen by the
//! application.
//!
//! [`ThreadExecutor`] is the stock choice: one dedicated OS thread that runs
//! tasks one at a time in submission order, so a receiver sees messages in the
//! order they arrived.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;

use thiserror::Error;
use tracing::{debug, error};

/// One unit of delivery work.
pub type DispatchTask = Box<dyn FnOnce() + Send + 'static>;

/// Errors returned when a task cannot be accepted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The executor is no longer running.
    #[error("dispatch executor has stopped")]
    Stopped,
}

/// An execution context for delivery callbacks.
///
/// Implementations must run tasks off the submitting task.  To preserve
/// message order they should also run them in submission order.
pub trait DispatchExecutor: Send + Sync {
    /// Schedules `task` for execution.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Stopped`] if the executor can no longer run
    /// tasks; the task is dropped.
    fn execute(&self, task: DispatchTask) -> Result<(), DispatchError>;
}

/// A serial executor backed by one named OS thread.
///
/// Clones share the same thread.  The thread exits after the last clone is
/// dropped and every queued task has run.  A panicking task is logged and
/// does not stop the thread.
#[derive(Debug, Clone)]
pub struct ThreadExecutor {
    tx: mpsc::Sender<DispatchTask>,
}

impl ThreadExecutor {
    /// Spawns the worker thread.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be created.
    pub fn spawn(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<DispatchTask>();
        let thread_name = name.clone();
        thread::Builder::new().name(name).spawn(move || {
            debug!("dispatch thread {thread_name} started");
            for task in rx {
                if catch_unwind(AssertUnwindSafe(task)).is_err() {
                    error!("dispatch thread {thread_name}: receiver panicked; continuing");
                }
            }
            debug!("dispatch thread {thread_name} stopped");
        })?;
        Ok(Self { tx })
    }
}

impl DispatchExecutor for ThreadExecutor {
    fn execute(&self, task: DispatchTask) -> Result<(), DispatchError> {
        self.tx.send(task).map_err(|_| DispatchError::Stopped)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn test_tasks_run_in_submission_order() {
        // Arrange
        let exec = ThreadExecutor::spawn("dispatch-order-test").expect("spawn");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = mpsc::channel();

        // Act
        for i in 0..50 {
            let seen = Arc::clone(&seen);
            exec.execute(Box::new(move || seen.lock().unwrap().push(i)))
                .expect("accepted");
        }
        exec.execute(Box::new(move || done_tx.send(()).unwrap()))
            .expect("accepted");
        done_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("tasks must finish");

        // Assert
        assert_eq!(*seen.lock().unwrap(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_tasks_run_on_named_thread() {
        // Arrange
        let exec = ThreadExecutor::spawn("dispatch-name-test").expect("spawn");
        let (tx, rx) = mpsc::channel();

        // Act
        exec.execute(Box::new(move || {
            let name = thread::current().name().map(str::to_owned);
            tx.send(name).unwrap();
        }))
        .expect("accepted");

        // Assert
        let name = rx.recv_timeout(Duration::from_secs(2)).expect("ran");
        assert_eq!(name.as_deref(), Some("dispatch-name-test"));
    }

    #[test]
    fn test_panicking_task_does_not_stop_the_thread() {
        // Arrange
        let exec = ThreadExecutor::spawn("dispatch-panic-test").expect("spawn");
        let (tx, rx) = mpsc::channel();

        // Act
        exec.execute(Box::new(|| panic!("receiver bug")))
            .expect("accepted");
        exec.execute(Box::new(move || tx.send(7).unwrap()))
            .expect("accepted");

        // Assert
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(7));
    }
}
