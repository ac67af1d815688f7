//! # Error Taxonomy
//!
//! - [`ResolutionError`]: no converter or call adapter matched a type, or a factory
//!   failed while trying. Carries the probed factory names in order.
//! - [`MethodError`]: a service method definition cannot be compiled. Fatal, never
//!   retried, always names the method.
//! - [`CallError`]: per-call runtime failure, delivered through exactly one channel
//!   (synchronous return, completion callback, or suspension).

use crate::template::MethodId;
use crate::transport::{ResponseBody, TransportError};
use crate::types::TypeRef;
use http::StatusCode;
use std::fmt;
use std::sync::Arc;

/// What a registry was asked to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTarget {
    CallAdapter,
    RequestBodyConverter,
    ResponseBodyConverter,
    StringConverter,
}

impl fmt::Display for ResolutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionTarget::CallAdapter => write!(f, "call adapter"),
            ResolutionTarget::RequestBodyConverter => write!(f, "RequestBody converter"),
            ResolutionTarget::ResponseBodyConverter => write!(f, "ResponseBody converter"),
            ResolutionTarget::StringConverter => write!(f, "String converter"),
        }
    }
}

/// Registry resolution failure
#[derive(Debug)]
pub enum ResolutionError {
    /// No factory recognised the type
    NotFound {
        target: ResolutionTarget,
        ty: TypeRef,
        /// Factories before the skip-past position; `None` when no skip-past was given
        skipped: Option<Vec<&'static str>>,
        /// Factories probed, in order
        tried: Vec<&'static str>,
    },
    /// A factory recognised the type but failed to build its product
    FactoryFailed {
        target: ResolutionTarget,
        ty: TypeRef,
        factory: &'static str,
        source: anyhow::Error,
    },
}

impl ResolutionError {
    #[must_use]
    pub fn target(&self) -> ResolutionTarget {
        match self {
            ResolutionError::NotFound { target, .. }
            | ResolutionError::FactoryFailed { target, .. } => *target,
        }
    }

    #[must_use]
    pub fn ty(&self) -> &TypeRef {
        match self {
            ResolutionError::NotFound { ty, .. } | ResolutionError::FactoryFailed { ty, .. } => ty,
        }
    }

    /// Probed factory names, empty for [`ResolutionError::FactoryFailed`].
    #[must_use]
    pub fn tried(&self) -> &[&'static str] {
        match self {
            ResolutionError::NotFound { tried, .. } => tried,
            ResolutionError::FactoryFailed { .. } => &[],
        }
    }

    #[must_use]
    pub fn skipped(&self) -> Option<&[&'static str]> {
        match self {
            ResolutionError::NotFound { skipped, .. } => skipped.as_deref(),
            ResolutionError::FactoryFailed { .. } => None,
        }
    }
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionError::NotFound {
                target,
                ty,
                skipped,
                tried,
            } => {
                write!(f, "Could not locate {target} for {ty}.")?;
                if let Some(skipped) = skipped {
                    write!(f, "\n  Skipped:")?;
                    for name in skipped {
                        write!(f, "\n   * {name}")?;
                    }
                }
                write!(f, "\n  Tried:")?;
                for name in tried {
                    write!(f, "\n   * {name}")?;
                }
                Ok(())
            }
            ResolutionError::FactoryFailed {
                target,
                ty,
                factory,
                source,
            } => write!(f, "{factory} failed to create {target} for {ty}: {source:#}"),
        }
    }
}

impl std::error::Error for ResolutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResolutionError::FactoryFailed { source, .. } => Some(&**source),
            ResolutionError::NotFound { .. } => None,
        }
    }
}

/// A service method definition that cannot be compiled into a dispatch strategy.
#[derive(Debug)]
pub struct MethodError {
    method: MethodId,
    message: String,
    source: Option<anyhow::Error>,
}

impl MethodError {
    pub fn new(method: MethodId, message: impl Into<String>) -> Self {
        Self {
            method,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        method: MethodId,
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self {
            method,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    #[must_use]
    pub fn method(&self) -> MethodId {
        self.method
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The underlying resolution failure, when there was one.
    #[must_use]
    pub fn resolution(&self) -> Option<&ResolutionError> {
        self.source.as_ref()?.downcast_ref::<ResolutionError>()
    }
}

impl fmt::Display for MethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n    for method {}", self.message, self.method)
    }
}

impl std::error::Error for MethodError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Runtime failure of a single call.
#[derive(Debug)]
pub enum CallError {
    /// Network-level failure reported by the transport
    Transport(TransportError),
    /// The call was cancelled
    Cancelled,
    /// The server answered with a non-2xx status where only a body was wanted
    Http {
        status: StatusCode,
        body: Option<ResponseBody>,
    },
    /// A non-nullable body was absent
    MissingBody { method: MethodId },
    /// The response body could not be decoded
    Conversion(anyhow::Error),
    /// The request could not be built from the arguments
    Request(Arc<anyhow::Error>),
    /// The call handle was already executed or enqueued
    AlreadyExecuted,
    /// Failure raised synchronously while arming a suspension
    Arming(String),
    /// The method could not be compiled
    Definition(MethodError),
    /// A typed view asked for a body of the wrong type
    BodyType { expected: &'static str },
}

impl CallError {
    pub fn request(err: impl Into<anyhow::Error>) -> Self {
        CallError::Request(Arc::new(err.into()))
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            CallError::Cancelled | CallError::Transport(TransportError::Cancelled)
        )
    }

    /// Status of an HTTP failure.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            CallError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Transport(e) => write!(f, "transport failure: {e}"),
            CallError::Cancelled => write!(f, "Canceled"),
            CallError::Http { status, .. } => match status.canonical_reason() {
                Some(reason) => write!(f, "HTTP {} {reason}", status.as_u16()),
                None => write!(f, "HTTP {}", status.as_u16()),
            },
            CallError::MissingBody { method } => write!(
                f,
                "Response from {method} was null but response body type was declared as non-null"
            ),
            CallError::Conversion(e) => write!(f, "failed to convert response body: {e:#}"),
            CallError::Request(e) => write!(f, "failed to create request: {e:#}"),
            CallError::AlreadyExecuted => write!(f, "Already executed."),
            CallError::Arming(message) => write!(f, "failed to arm suspension: {message}"),
            CallError::Definition(e) => write!(f, "{e}"),
            CallError::BodyType { expected } => {
                write!(f, "response body is not of type {expected}")
            }
        }
    }
}

impl std::error::Error for CallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CallError::Transport(e) => Some(e),
            CallError::Conversion(e) => Some(&**e),
            CallError::Request(e) => Some(&***e),
            CallError::Definition(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for CallError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => CallError::Cancelled,
            other => CallError::Transport(other),
        }
    }
}

impl From<MethodError> for CallError {
    fn from(err: MethodError) -> Self {
        CallError::Definition(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method() -> MethodId {
        MethodId::new("GitHub", "contributors")
    }

    #[test]
    fn test_not_found_lists_skipped_then_tried() {
        let err = ResolutionError::NotFound {
            target: ResolutionTarget::CallAdapter,
            ty: TypeRef::named("Flowable"),
            skipped: Some(vec!["First"]),
            tried: vec!["Second", "Third"],
        };
        assert_eq!(
            err.to_string(),
            "Could not locate call adapter for Flowable.\n  Skipped:\n   * First\n  Tried:\n   * Second\n   * Third"
        );
    }

    #[test]
    fn test_not_found_without_skip_past_omits_skipped_section() {
        let err = ResolutionError::NotFound {
            target: ResolutionTarget::ResponseBodyConverter,
            ty: TypeRef::named("Map"),
            skipped: None,
            tried: vec!["BuiltIn"],
        };
        let message = err.to_string();
        assert!(message.starts_with("Could not locate ResponseBody converter for Map."));
        assert!(!message.contains("Skipped"));
    }

    #[test]
    fn test_method_error_names_the_method() {
        let err = MethodError::new(method(), "Service methods cannot return void.");
        assert_eq!(
            err.to_string(),
            "Service methods cannot return void.\n    for method GitHub.contributors"
        );
        assert!(err.resolution().is_none());
    }

    #[test]
    fn test_transport_cancellation_maps_to_cancelled() {
        let err: CallError = TransportError::Cancelled.into();
        assert!(matches!(err, CallError::Cancelled));
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "Canceled");

        let timeout: CallError = TransportError::Timeout.into();
        assert!(!timeout.is_cancelled());
    }

    #[test]
    fn test_missing_body_message() {
        let err = CallError::MissingBody { method: method() };
        assert_eq!(
            err.to_string(),
            "Response from GitHub.contributors was null but response body type was declared as non-null"
        );
    }
}
