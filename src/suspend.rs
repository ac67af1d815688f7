//! # Suspension
//!
//! A suspending method arms its call and yields a [`Suspension`], a future that
//! resolves exactly once with the call's outcome. The calling task is parked without
//! blocking its thread while the transport works.
//!
//! - The completion callback resumes the future through a one-shot slot; a second
//!   resumption attempt finds the slot empty and is dropped.
//! - A panic raised while arming is caught and delivered through the future.
//! - Dropping an unresolved [`Suspension`] cancels the call.

use crate::call::{CallHandle, Payload, Response};
use crate::error::CallError;
use crate::template::MethodId;
use crate::transport::TransportError;
use futures::channel::oneshot;
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tracing::{debug, warn};

type Slot<T> = Arc<Mutex<Option<oneshot::Sender<Result<T, CallError>>>>>;

fn resume<T>(slot: &Slot<T>, result: Result<T, CallError>) {
    let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    match sender {
        Some(tx) => {
            // The receiver may already be gone if the caller stopped waiting.
            let _ = tx.send(result);
        }
        None => warn!("Suspension already resumed, dropping second outcome"),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// A future resumed exactly once with a call outcome.
#[must_use = "a suspension does nothing unless awaited, and cancels its call when dropped"]
pub struct Suspension<T> {
    rx: oneshot::Receiver<Result<T, CallError>>,
    call: Option<CallHandle>,
    finished: bool,
}

impl<T> Suspension<T> {
    /// A suspension that is already resolved with `error`.
    pub fn failed(error: CallError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self {
            rx,
            call: None,
            finished: false,
        }
    }
}

impl<T> Future for Suspension<T> {
    type Output = Result<T, CallError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(outcome)) => {
                this.finished = true;
                Poll::Ready(outcome)
            }
            Poll::Ready(Err(oneshot::Canceled)) => {
                this.finished = true;
                Poll::Ready(Err(CallError::Transport(TransportError::Failed(
                    anyhow::anyhow!("call completed without reporting an outcome"),
                ))))
            }
        }
    }
}

impl<T> Drop for Suspension<T> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(call) = self.call.take() {
            debug!(call_id = %call.id(), "Suspension dropped before completion, cancelling call");
            call.cancel();
        }
    }
}

/// Enqueue `call` and suspend until `finish` maps its outcome.
pub fn arm<T, F>(call: CallHandle, finish: F) -> Suspension<T>
where
    T: Send + 'static,
    F: FnOnce(Result<Response, CallError>) -> Result<T, CallError> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let slot: Slot<T> = Arc::new(Mutex::new(Some(tx)));
    let callback_slot = Arc::clone(&slot);

    let armed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        call.enqueue(Box::new(move |outcome| {
            resume(&callback_slot, finish(outcome));
        }));
    }));
    if let Err(panic) = armed {
        let message = panic_message(panic.as_ref());
        warn!(call_id = %call.id(), panic_message = %message, "Arming suspension panicked");
        resume(&slot, Err(CallError::Arming(message)));
    }

    Suspension {
        rx,
        call: Some(call),
        finished: false,
    }
}

fn http_error(response: Response) -> CallError {
    let status = response.status();
    CallError::Http {
        status,
        body: response.into_error_body(),
    }
}

/// Resume with the full envelope, successful or not.
pub fn await_response(call: CallHandle) -> Suspension<Response> {
    arm(call, |outcome| outcome)
}

/// Resume with the decoded body. An absent body on a 2xx response is a
/// [`CallError::MissingBody`] naming `method`.
pub fn await_body(call: CallHandle, method: MethodId) -> Suspension<Payload> {
    arm(call, move |outcome| {
        let response = outcome?;
        if !response.is_successful() {
            return Err(http_error(response));
        }
        response.into_body().ok_or(CallError::MissingBody { method })
    })
}

/// Resume with the decoded body, which may legitimately be absent.
pub fn await_optional(call: CallHandle) -> Suspension<Option<Payload>> {
    arm(call, |outcome| {
        let response = outcome?;
        if !response.is_successful() {
            return Err(http_error(response));
        }
        Ok(response.into_body())
    })
}

/// Resume with `()` on success, whatever the body held.
pub fn await_unit(call: CallHandle) -> Suspension<()> {
    arm(call, |outcome| {
        let response = outcome?;
        if !response.is_successful() {
            return Err(http_error(response));
        }
        Ok(())
    })
}

/// Deliver a synchronous failure through a suspension instead of raising it.
pub fn suspend_and_fail<T>(error: CallError) -> Suspension<T> {
    debug!(error = %error, "Delivering arming failure through suspension");
    Suspension::failed(error)
}
