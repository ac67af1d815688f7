//! # Dispatch Strategy Compiler
//!
//! [`ServiceMethod::compile`] decides, once per method, how its invocations are
//! dispatched:
//!
//! 1. Take the declared shape. For a suspending method it is the suspension's output.
//! 2. A suspending output of `Response<T>` unwraps to `T` and asks for the envelope.
//!    A body-only output of `Option<T>` unwraps to `T` and allows an absent body.
//! 3. Resolve the call adapter against the declared shape, or `Call<T>` for a
//!    suspending method (with the skip-executor marker added).
//! 4. Reject raw transport responses and bare `Response` as body types.
//! 5. Reject HEAD methods whose body type is not void or unit.
//! 6. Resolve the response converter for the body type.
//! 7. Pick the [`Variant`]. Suspending for unit or void resumes with `()`.
//!
//! Every failure is a [`MethodError`] naming the method. Nothing is retried.

use crate::adapter::CallAdapter;
use crate::annotations::Annotation;
use crate::args::Args;
use crate::call::{CallHandle, Payload, Response};
use crate::converter::ResponseConverter;
use crate::error::{CallError, MethodError};
use crate::http_call::HttpCall;
use crate::registry::Registry;
use crate::suspend::{self, panic_message};
use crate::template::{MethodDescriptor, MethodId, RequestTemplate, Signature};
use crate::transport::CallFactory;
use crate::types::{RawType, TypeRef};
use futures::future::{BoxFuture, FutureExt};
use http::Method;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// How invocations of a compiled method reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Return whatever the call adapter produces
    Adapted,
    /// Suspend, then resume with the full response envelope
    SuspendForResponse,
    /// Suspend, then resume with the decoded body only
    SuspendForBody {
        /// An absent body resumes with nothing instead of failing
        nullable: bool,
        /// The body type is unit or void; success resumes with `()` and the body is
        /// never consulted
        unit: bool,
    },
}

/// What a suspended invocation resumes with.
pub enum Resumption {
    Response(Response),
    Body(Payload),
    /// A nullable body that was absent
    Absent,
}

impl Resumption {
    /// The envelope of a [`Variant::SuspendForResponse`] method.
    pub fn into_response(self) -> Result<Response, CallError> {
        match self {
            Resumption::Response(response) => Ok(response),
            _ => Err(CallError::BodyType {
                expected: "Response",
            }),
        }
    }

    /// A present body of type `T`.
    pub fn into_body<T: 'static>(self) -> Result<T, CallError> {
        match self.into_optional::<T>()? {
            Some(body) => Ok(body),
            None => Err(CallError::BodyType {
                expected: std::any::type_name::<T>(),
            }),
        }
    }

    /// A body of type `T` that may be absent.
    pub fn into_optional<T: 'static>(self) -> Result<Option<T>, CallError> {
        let mismatch = || CallError::BodyType {
            expected: std::any::type_name::<T>(),
        };
        match self {
            Resumption::Body(payload) => payload
                .downcast::<T>()
                .map(|body| Some(*body))
                .map_err(|_| mismatch()),
            Resumption::Absent => Ok(None),
            Resumption::Response(_) => Err(mismatch()),
        }
    }
}

impl fmt::Debug for Resumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resumption::Response(response) => f.debug_tuple("Response").field(response).finish(),
            Resumption::Body(_) => f.write_str("Body(..)"),
            Resumption::Absent => f.write_str("Absent"),
        }
    }
}

/// Future of a suspended invocation.
pub type SuspendedCall = BoxFuture<'static, Result<Resumption, CallError>>;

/// Result of invoking a compiled method.
pub enum Invocation {
    /// The call adapter's product
    Adapted(Payload),
    /// A suspension resumed exactly once
    Suspended(SuspendedCall),
}

impl Invocation {
    #[must_use]
    pub fn into_adapted(self) -> Option<Payload> {
        match self {
            Invocation::Adapted(payload) => Some(payload),
            Invocation::Suspended(_) => None,
        }
    }

    #[must_use]
    pub fn into_suspended(self) -> Option<SuspendedCall> {
        match self {
            Invocation::Suspended(future) => Some(future),
            Invocation::Adapted(_) => None,
        }
    }
}

/// A compiled dispatch strategy. Immutable and shared across invocations.
pub struct ServiceMethod {
    id: MethodId,
    template: Arc<RequestTemplate>,
    call_factory: Arc<dyn CallFactory>,
    converter: Arc<dyn ResponseConverter>,
    adapter: Arc<dyn CallAdapter>,
    response_type: TypeRef,
    variant: Variant,
}

impl ServiceMethod {
    /// Compile `descriptor` into a dispatch strategy.
    ///
    /// # Errors
    ///
    /// [`MethodError`] when the descriptor is invalid or no adapter or converter fits.
    pub fn compile(
        descriptor: &MethodDescriptor,
        base_url: &Url,
        registry: &Registry,
        call_factory: Arc<dyn CallFactory>,
    ) -> Result<Self, MethodError> {
        let id = descriptor.id();
        debug!(method = %id, "Compiling service method");

        let template = RequestTemplate::parse(descriptor, base_url, registry)?;
        let method_annotations = descriptor.annotations();

        let (adapter_type, adapter_annotations, wants_response, nullable) =
            match template.signature() {
                Signature::Returns(ty) => {
                    if ty.is_unit() || ty.is_void() {
                        return Err(MethodError::new(id, "Service methods cannot return void."));
                    }
                    (ty.clone(), method_annotations.clone(), false, false)
                }
                Signature::Suspends(ty) => {
                    let (inner, wants_response) = match (ty.raw(), ty.arg(0)) {
                        (RawType::Response, Some(inner)) => (inner.clone(), true),
                        _ => (ty.clone(), false),
                    };
                    let (inner, nullable) = match (inner.raw(), inner.arg(0)) {
                        (RawType::Optional, Some(value)) if !wants_response => {
                            (value.clone(), true)
                        }
                        _ => (inner, false),
                    };
                    (
                        TypeRef::call(inner),
                        method_annotations.ensure_present(Annotation::SkipCallbackExecutor),
                        wants_response,
                        nullable,
                    )
                }
            };

        let adapter = registry
            .call_adapter(&adapter_type, &adapter_annotations)
            .map_err(|e| {
                MethodError::with_source(
                    id,
                    format!("Unable to create call adapter for {adapter_type}"),
                    e,
                )
            })?;
        let response_type = adapter.response_type().clone();

        if response_type.raw() == &RawType::RawResponse {
            return Err(MethodError::new(
                id,
                format!(
                    "'{}' is not a valid response body type. Did you mean ResponseBody?",
                    response_type.raw()
                ),
            ));
        }
        if response_type.raw() == &RawType::Response && !response_type.is_parameterized() {
            return Err(MethodError::new(
                id,
                "Response must include generic type (e.g., Response<String>)",
            ));
        }
        if *template.verb() == Method::HEAD && !response_type.is_void() && !response_type.is_unit() {
            return Err(MethodError::new(
                id,
                "HEAD method must use Void or Unit as response type.",
            ));
        }

        let converter = registry
            .response_body_converter(&response_type, method_annotations)
            .map_err(|e| {
                MethodError::with_source(
                    id,
                    format!("Unable to create converter for {response_type}"),
                    e,
                )
            })?;

        let variant = if !template.is_suspend() {
            Variant::Adapted
        } else if wants_response {
            Variant::SuspendForResponse
        } else {
            Variant::SuspendForBody {
                nullable,
                unit: response_type.is_unit() || response_type.is_void(),
            }
        };

        info!(
            method = %id,
            variant = ?variant,
            response_type = %response_type,
            "Compiled service method"
        );

        Ok(Self {
            id,
            template: Arc::new(template),
            call_factory,
            converter,
            adapter,
            response_type,
            variant,
        })
    }

    /// Run one invocation: build a fresh call for `args` and route it through the variant.
    pub fn invoke(&self, args: Args) -> Invocation {
        let call: CallHandle = Arc::new(HttpCall::new(
            Arc::clone(&self.template),
            args,
            Arc::clone(&self.call_factory),
            Arc::clone(&self.converter),
        ));
        debug!(method = %self.id, call_id = %call.id(), variant = ?self.variant, "Invoking service method");

        match self.variant {
            Variant::Adapted => Invocation::Adapted(self.adapter.adapt(call)),
            Variant::SuspendForResponse => Invocation::Suspended(self.suspend(call, |call, _| {
                suspend::await_response(call)
                    .map(|outcome| outcome.map(Resumption::Response))
                    .boxed()
            })),
            Variant::SuspendForBody { unit: true, .. } => {
                Invocation::Suspended(self.suspend(call, |call, _| {
                    suspend::await_unit(call)
                        .map(|outcome| outcome.map(|()| Resumption::Body(Box::new(()))))
                        .boxed()
                }))
            }
            Variant::SuspendForBody { nullable: true, .. } => {
                Invocation::Suspended(self.suspend(call, |call, _| {
                    suspend::await_optional(call)
                        .map(|outcome| {
                            outcome.map(|body| body.map_or(Resumption::Absent, Resumption::Body))
                        })
                        .boxed()
                }))
            }
            Variant::SuspendForBody { .. } => Invocation::Suspended(self.suspend(call, |call, id| {
                suspend::await_body(call, id)
                    .map(|outcome| outcome.map(Resumption::Body))
                    .boxed()
            })),
        }
    }

    /// Adapt `call` and arm the suspension. Anything raised on the way is delivered
    /// through the returned future.
    fn suspend<F>(&self, call: CallHandle, arm: F) -> SuspendedCall
    where
        F: FnOnce(CallHandle, MethodId) -> SuspendedCall,
    {
        let id = self.id;
        let armed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let adapted = self.adapter.adapt(call);
            match adapted.downcast::<CallHandle>() {
                Ok(handle) => arm(*handle, id),
                Err(_) => suspend::suspend_and_fail(CallError::Arming(format!(
                    "call adapter for {id} did not produce a call handle"
                )))
                .boxed(),
            }
        }));
        armed.unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            warn!(method = %id, panic_message = %message, "Arming suspension panicked");
            suspend::suspend_and_fail(CallError::Arming(message)).boxed()
        })
    }

    #[must_use]
    pub fn id(&self) -> MethodId {
        self.id
    }

    #[must_use]
    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// The body type the converter decodes.
    #[must_use]
    pub fn response_type(&self) -> &TypeRef {
        &self.response_type
    }

    #[must_use]
    pub fn template(&self) -> &RequestTemplate {
        &self.template
    }
}

impl fmt::Debug for ServiceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceMethod")
            .field("id", &self.id)
            .field("variant", &self.variant)
            .field("response_type", &self.response_type)
            .finish()
    }
}
