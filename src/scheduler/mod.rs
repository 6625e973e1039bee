//! Coordination between concurrent threads and pauses.

mod suspendible_thread_set;

pub use self::suspendible_thread_set::{SuspendibleThreadSet, SuspendibleThreadSetJoiner};

/// Returned by a waiting worker when it has been asked to terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkerShouldExit;
