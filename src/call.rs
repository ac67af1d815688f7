//! # Call Handles
//!
//! A [`Call`] is one outbound request, executed at most once. It can be executed
//! synchronously or enqueued with a completion [`Callback`], cancelled at any point,
//! and cloned into a fresh, unexecuted duplicate.
//!
//! Compiled strategies and call adapters deal in type-erased handles
//! ([`CallHandle`]) and envelopes ([`Response`] over [`Payload`]). [`TypedCall`] is
//! the typed view handed to callers.

use crate::error::CallError;
use crate::ids::CallId;
use crate::transport::{Request, ResponseBody, TimeoutPolicy};
use http::{HeaderMap, StatusCode};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A decoded body of erased type.
pub type Payload = Box<dyn Any + Send>;

/// Completion callback of a [`Call`]. Invoked exactly once.
pub type Callback = Box<dyn FnOnce(Result<Response, CallError>) + Send>;

/// Shared, type-erased call handle.
pub type CallHandle = Arc<dyn Call>;

/// The response envelope: status, headers and an optional decoded body.
///
/// Unsuccessful responses carry no decoded body; the raw bytes the server sent
/// are kept in [`Response::error_body`].
pub struct Response<T = Payload> {
    status: StatusCode,
    headers: HeaderMap,
    body: Option<T>,
    error_body: Option<ResponseBody>,
}

impl<T> Response<T> {
    /// A successful envelope. `body` is absent for 204/205 or when the converter decoded nothing.
    #[must_use]
    pub fn success(status: StatusCode, headers: HeaderMap, body: Option<T>) -> Self {
        Self {
            status,
            headers,
            body,
            error_body: None,
        }
    }

    #[must_use]
    pub fn error(status: StatusCode, headers: HeaderMap, error_body: Option<ResponseBody>) -> Self {
        Self {
            status,
            headers,
            body: None,
            error_body,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> Option<&T> {
        self.body.as_ref()
    }

    #[must_use]
    pub fn error_body(&self) -> Option<&ResponseBody> {
        self.error_body.as_ref()
    }

    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.status.is_success()
    }

    pub fn into_body(self) -> Option<T> {
        self.body
    }

    pub fn into_error_body(self) -> Option<ResponseBody> {
        self.error_body
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        Response {
            status: self.status,
            headers: self.headers,
            body: self.body.map(f),
            error_body: self.error_body,
        }
    }
}

impl Response<Payload> {
    /// Recover the concrete body type.
    ///
    /// # Errors
    ///
    /// [`CallError::BodyType`] when the decoded body is not a `T`.
    pub fn downcast<T: 'static>(self) -> Result<Response<T>, CallError> {
        let Response {
            status,
            headers,
            body,
            error_body,
        } = self;
        let body = match body {
            Some(payload) => Some(*payload.downcast::<T>().map_err(|_| CallError::BodyType {
                expected: std::any::type_name::<T>(),
            })?),
            None => None,
        };
        Ok(Response {
            status,
            headers,
            body,
            error_body,
        })
    }
}

impl<T> fmt::Debug for Response<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("has_body", &self.body.is_some())
            .field("error_body", &self.error_body)
            .finish()
    }
}

/// One outbound call.
pub trait Call: Send + Sync {
    fn id(&self) -> CallId;

    /// Run the call on the current thread.
    ///
    /// # Errors
    ///
    /// [`CallError::AlreadyExecuted`] on a second execution; otherwise transport,
    /// conversion or request-creation failures.
    fn execute(&self) -> Result<Response, CallError>;

    /// Run the call asynchronously and report to `callback`.
    fn enqueue(&self, callback: Callback);

    fn is_executed(&self) -> bool;

    /// Cancel the call. Idempotent.
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;

    /// A fresh, unexecuted call for the same request.
    fn clone_call(&self) -> CallHandle;

    /// The request this call sends, building it if necessary.
    fn request(&self) -> Result<Request, CallError>;

    fn timeout(&self) -> TimeoutPolicy;
}

/// Typed view over a [`CallHandle`] whose decoded body is a `T`.
pub struct TypedCall<T> {
    inner: CallHandle,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> TypedCall<T> {
    #[must_use]
    pub fn new(inner: CallHandle) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn execute(&self) -> Result<Response<T>, CallError> {
        self.inner.execute()?.downcast::<T>()
    }

    pub fn enqueue<F>(&self, callback: F)
    where
        F: FnOnce(Result<Response<T>, CallError>) + Send + 'static,
    {
        self.inner
            .enqueue(Box::new(move |outcome| callback(outcome.and_then(Response::downcast::<T>))));
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    #[must_use]
    pub fn is_executed(&self) -> bool {
        self.inner.is_executed()
    }

    #[must_use]
    pub fn clone_call(&self) -> Self {
        Self::new(self.inner.clone_call())
    }

    pub fn request(&self) -> Result<Request, CallError> {
        self.inner.request()
    }

    #[must_use]
    pub fn timeout(&self) -> TimeoutPolicy {
        self.inner.timeout()
    }

    #[must_use]
    pub fn id(&self) -> CallId {
        self.inner.id()
    }

    #[must_use]
    pub fn handle(&self) -> &CallHandle {
        &self.inner
    }

    #[must_use]
    pub fn into_handle(self) -> CallHandle {
        self.inner
    }
}

impl<T> fmt::Debug for TypedCall<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedCall")
            .field("id", &self.inner.id())
            .field("body", &std::any::type_name::<T>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast_recovers_body() {
        let response: Response =
            Response::success(StatusCode::OK, HeaderMap::new(), Some(Box::new(7_u32) as Payload));
        let typed = response.downcast::<u32>().unwrap();
        assert_eq!(typed.body(), Some(&7));
        assert!(typed.is_successful());
    }

    #[test]
    fn test_downcast_rejects_wrong_type() {
        let response: Response = Response::success(
            StatusCode::OK,
            HeaderMap::new(),
            Some(Box::new("text".to_string()) as Payload),
        );
        let err = response.downcast::<u32>().unwrap_err();
        assert!(matches!(err, CallError::BodyType { expected: "u32" }));
    }

    #[test]
    fn test_error_envelope_keeps_raw_body() {
        let response: Response<String> = Response::error(
            StatusCode::NOT_FOUND,
            HeaderMap::new(),
            Some(ResponseBody::new(None, "missing")),
        );
        assert!(!response.is_successful());
        assert!(response.body().is_none());
        assert_eq!(response.error_body().map(|b| b.bytes().as_ref()), Some(&b"missing"[..]));
    }
}
