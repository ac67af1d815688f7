use super::CallbackExecutor;
use crate::call::{Call, CallHandle, Callback, Response};
use crate::error::CallError;
use crate::ids::CallId;
use crate::transport::{Request, TimeoutPolicy};
use std::sync::Arc;
use tracing::debug;

/// A call whose completion callback always runs on a [`CallbackExecutor`].
///
/// Once the delegate reports cancelled, a completion that is still waiting on the
/// executor is delivered as [`CallError::Cancelled`] instead of the original outcome.
pub struct ExecutorCallbackCall {
    executor: Arc<dyn CallbackExecutor>,
    delegate: CallHandle,
}

impl ExecutorCallbackCall {
    pub fn new(executor: Arc<dyn CallbackExecutor>, delegate: CallHandle) -> Self {
        Self { executor, delegate }
    }

    #[must_use]
    pub fn delegate(&self) -> &CallHandle {
        &self.delegate
    }
}

impl Call for ExecutorCallbackCall {
    fn id(&self) -> CallId {
        self.delegate.id()
    }

    fn execute(&self) -> Result<Response, CallError> {
        self.delegate.execute()
    }

    fn enqueue(&self, callback: Callback) {
        let executor = Arc::clone(&self.executor);
        let delegate = Arc::clone(&self.delegate);
        self.delegate.enqueue(Box::new(move |outcome| {
            let call_id = delegate.id();
            debug!(call_id = %call_id, ok = outcome.is_ok(), "Scheduling callback on executor");
            executor.execute(Box::new(move || {
                let outcome = if delegate.is_cancelled() {
                    debug!(call_id = %call_id, "Call cancelled before callback ran");
                    Err(CallError::Cancelled)
                } else {
                    outcome
                };
                callback(outcome);
            }));
        }));
    }

    fn is_executed(&self) -> bool {
        self.delegate.is_executed()
    }

    fn cancel(&self) {
        self.delegate.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.delegate.is_cancelled()
    }

    fn clone_call(&self) -> CallHandle {
        Arc::new(ExecutorCallbackCall::new(
            Arc::clone(&self.executor),
            self.delegate.clone_call(),
        ))
    }

    fn request(&self) -> Result<Request, CallError> {
        self.delegate.request()
    }

    fn timeout(&self) -> TimeoutPolicy {
        self.delegate.timeout()
    }
}
