//! Parallel evaluation of blocks of work items.
//!
//! A [`WorkerPool`] owns a fixed set of threads.  The [`Dispatcher`] hands
//! each block of a computation to the pool, runs the core function on it, and
//! collects one partial result per block.  Every invocation receives a
//! read-only [`TaskMonitor`], and its timing is recorded into the
//! computation's [`Monitor`].

mod dispatch;
mod monitor;
mod pool;

pub use dispatch::{CallMeasurement, Dispatcher, Partial};
pub use monitor::{Monitor, Phase, TaskMonitor};
pub use pool::{worker_index, WorkerPool};

use std::any::Any;
use std::fmt::{self, Display, Formatter};

/// Information about a panic inside a core function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerPanicInfo {
    /// Panic message, if any.
    message: Option<String>,
    /// Index of the pool worker that panicked, or `None` for the calling
    /// thread.
    worker: Option<usize>,
}

impl WorkerPanicInfo {
    pub(crate) fn new(payload: &(dyn Any + Send), worker: Option<usize>) -> Self {
        #[allow(clippy::manual_map)]
        let message = if let Some(v) = payload.downcast_ref::<String>() {
            Some(v.clone())
        } else if let Some(v) = payload.downcast_ref::<&str>() {
            Some(v.to_string())
        } else {
            None
        };
        Self { message, worker }
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn worker(&self) -> Option<usize> {
        self.worker
    }
}

impl Display for WorkerPanicInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "panic message: {message}")?,
            None => write!(f, "panic message (none)")?,
        }
        match self.worker {
            Some(worker) => write!(f, " (worker {worker})"),
            None => write!(f, " (calling thread)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::WorkerPanicInfo;

    #[test]
    fn panic_payloads() {
        let info = WorkerPanicInfo::new(&"boom", Some(3));
        assert_eq!(info.message(), Some("boom"));
        assert_eq!(info.to_string(), "panic message: boom (worker 3)");

        let info = WorkerPanicInfo::new(&String::from("bang"), None);
        assert_eq!(info.to_string(), "panic message: bang (calling thread)");

        let info = WorkerPanicInfo::new(&42u32, None);
        assert_eq!(info.message(), None);
    }
}
