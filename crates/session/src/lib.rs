mod delay_queue;
mod pool;
mod session;

use std::borrow::Cow;
use std::sync::{Mutex, MutexGuard, PoisonError};

use fluxion_core::error::GraphError;
use fluxion_core::node::NodeId;
use thiserror::Error;

pub use delay_queue::DelayQueue;
pub use pool::{RepeatStrategy, WorkerPool};
pub use session::{Session, SessionBuilder};

#[derive(Debug, Error)]
pub enum SessionError {
    /// Errors raised by the graph core while firing nodes.
    #[error("Graph: {0}")]
    Graph(#[from] GraphError),

    /// A node computation panicked; the run was aborted and downstream nodes
    /// are left without results.
    #[error("node {node} failed: {message}")]
    Computation { node: NodeId, message: String },

    /// The graph contains a cycle, detected before any node fired. Only fold
    /// connections can introduce one; plain edges always point forward.
    #[error("graph contains a cycle")]
    Cycle,

    /// General error messages.
    #[error("Something went wrong: {0}")]
    Message(Cow<'static, str>),
}

/// Locks a mutex, recovering the guard if a panicking job poisoned it.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
