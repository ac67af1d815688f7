//! # Callback Execution Contexts
//!
//! Transports report completion on whatever thread they like. Wrapping a call in
//! [`ExecutorCallbackCall`] re-dispatches its completion callback onto a
//! [`CallbackExecutor`] chosen by the engine's owner, so user callbacks always run in
//! one designated place.
//!
//! [`WorkerExecutor`] is the stock context: a single `may` coroutine draining an
//! ordered queue, so callbacks of one call never overtake each other.

mod callback_call;
mod worker;

pub use callback_call::ExecutorCallbackCall;
pub use worker::{ExecutorMetrics, WorkerExecutor};

/// A unit of work handed to an executor.
pub type Task = Box<dyn FnOnce() + Send>;

/// Runs callback tasks on a designated execution context.
pub trait CallbackExecutor: Send + Sync {
    /// Schedule `task`. Tasks submitted from one thread run in submission order.
    fn execute(&self, task: Task);
}
