//! # Transport Contract
//!
//! The engine never performs I/O itself. It builds a [`Request`] from a method's
//! request template and the invocation arguments, then hands it to a [`CallFactory`],
//! which returns a single-shot [`RawCall`]. Connection pooling, TLS and redirects are
//! the transport's business.
//!
//! [`ReqwestCallFactory`] is the transport used when an engine is built without one.

mod reqwest_client;

pub use reqwest_client::ReqwestCallFactory;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// An encoded request body.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestBody {
    content_type: Option<HeaderValue>,
    bytes: Bytes,
}

impl RequestBody {
    pub fn new(content_type: Option<HeaderValue>, bytes: impl Into<Bytes>) -> Self {
        Self {
            content_type,
            bytes: bytes.into(),
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::new(None, Bytes::new())
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&HeaderValue> {
        self.content_type.as_ref()
    }

    #[must_use]
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

/// A response body as delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseBody {
    content_type: Option<HeaderValue>,
    bytes: Bytes,
}

impl ResponseBody {
    pub fn new(content_type: Option<HeaderValue>, bytes: impl Into<Bytes>) -> Self {
        Self {
            content_type,
            bytes: bytes.into(),
        }
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&HeaderValue> {
        self.content_type.as_ref()
    }

    #[must_use]
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A fully built outbound request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
}

impl Request {
    /// Header lookup; a body's content type answers `Content-Type` when no explicit header was set.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name).or_else(|| {
            if name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()) {
                self.body.as_ref().and_then(RequestBody::content_type)
            } else {
                None
            }
        })
    }
}

/// The transport's own response object.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<ResponseBody>,
}

impl RawResponse {
    #[must_use]
    pub fn new(status: StatusCode, body: Option<ResponseBody>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }
}

/// Timeout applied to a whole call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub call: Option<Duration>,
}

impl TimeoutPolicy {
    #[must_use]
    pub fn none() -> Self {
        Self { call: None }
    }

    #[must_use]
    pub fn after(duration: Duration) -> Self {
        Self {
            call: Some(duration),
        }
    }
}

/// Network-level failure reported by a transport.
#[derive(Debug)]
pub enum TransportError {
    /// The call was cancelled before it completed
    Cancelled,
    /// The call exceeded its timeout policy
    Timeout,
    /// Connection, protocol or I/O failure
    Failed(anyhow::Error),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Cancelled => write!(f, "Canceled"),
            TransportError::Timeout => write!(f, "timeout"),
            TransportError::Failed(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Failed(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Completion callback of a [`RawCall`]. Invoked exactly once, on a transport thread.
pub type RawCallback = Box<dyn FnOnce(Result<RawResponse, TransportError>) + Send>;

/// One transport call for one request.
pub trait RawCall: Send + Sync {
    fn request(&self) -> &Request;

    /// Perform the call on the current thread.
    fn execute(&self) -> Result<RawResponse, TransportError>;

    /// Perform the call asynchronously, reporting the outcome to `callback`.
    fn enqueue(&self, callback: RawCallback);

    /// Cancel the call. Idempotent.
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;

    fn timeout(&self) -> TimeoutPolicy;
}

/// Produces transport calls.
pub trait CallFactory: Send + Sync {
    fn new_call(&self, request: Request) -> Arc<dyn RawCall>;
}
