//! # Call Adapters
//!
//! A call adapter turns the engine's [`CallHandle`] into the shape a method declares.
//! Its factory recognises that shape and names the body type the converter must
//! produce ([`CallAdapter::response_type`]).
//!
//! Two factories are always registered after the user's:
//!
//! - [`FutureCallAdapterFactory`] for `Future<T>` and `Future<Response<T>>`
//! - [`DefaultCallAdapterFactory`] for `Call<T>`, delivering callbacks through the
//!   engine's callback executor unless the method carries
//!   [`Annotation::SkipCallbackExecutor`]

use crate::annotations::{Annotation, Annotations};
use crate::call::{CallHandle, Payload, Response};
use crate::error::CallError;
use crate::executor::{CallbackExecutor, ExecutorCallbackCall};
use crate::registry::Registry;
use crate::suspend;
use crate::types::{RawType, TypeRef};
use anyhow::bail;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;

/// Adapts a call handle into a method's declared shape.
pub trait CallAdapter: Send + Sync {
    /// Body type the response converter must produce.
    fn response_type(&self) -> &TypeRef;

    fn adapt(&self, call: CallHandle) -> Payload;
}

/// Creates call adapters for the shapes it recognises.
pub trait CallAdapterFactory: Send + Sync {
    /// Name listed in resolution diagnostics.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// An adapter for `return_type`, `Ok(None)` when the shape is not handled.
    ///
    /// # Errors
    ///
    /// When the shape is recognised but malformed, e.g. missing its type argument.
    fn get(
        &self,
        return_type: &TypeRef,
        annotations: &Annotations,
        registry: &Registry,
    ) -> anyhow::Result<Option<Arc<dyn CallAdapter>>>;
}

/// Adapter for `Call<T>`. Produces a boxed [`CallHandle`].
#[derive(Clone)]
pub struct DefaultCallAdapterFactory {
    callback_executor: Option<Arc<dyn CallbackExecutor>>,
}

impl DefaultCallAdapterFactory {
    #[must_use]
    pub fn new(callback_executor: Option<Arc<dyn CallbackExecutor>>) -> Self {
        Self { callback_executor }
    }
}

struct DefaultCallAdapter {
    response_type: TypeRef,
    executor: Option<Arc<dyn CallbackExecutor>>,
}

impl CallAdapter for DefaultCallAdapter {
    fn response_type(&self) -> &TypeRef {
        &self.response_type
    }

    fn adapt(&self, call: CallHandle) -> Payload {
        let handle: CallHandle = match &self.executor {
            Some(executor) => Arc::new(ExecutorCallbackCall::new(Arc::clone(executor), call)),
            None => call,
        };
        Box::new(handle)
    }
}

impl CallAdapterFactory for DefaultCallAdapterFactory {
    fn get(
        &self,
        return_type: &TypeRef,
        annotations: &Annotations,
        _registry: &Registry,
    ) -> anyhow::Result<Option<Arc<dyn CallAdapter>>> {
        if return_type.raw() != &RawType::Call {
            return Ok(None);
        }
        let Some(response_type) = return_type.arg(0) else {
            bail!("Call return type must be parameterized as Call<Foo>");
        };
        let executor = if annotations.is_present(&Annotation::SkipCallbackExecutor) {
            None
        } else {
            self.callback_executor.clone()
        };
        Ok(Some(Arc::new(DefaultCallAdapter {
            response_type: response_type.clone(),
            executor,
        })))
    }
}

/// Future resolving with the envelope, produced for `Future<Response<T>>`.
pub type ResponseFuture = BoxFuture<'static, Result<Response, CallError>>;

/// Future resolving with the body, produced for `Future<T>`. Non-2xx fails with
/// [`CallError::Http`].
pub type BodyFuture = BoxFuture<'static, Result<Option<Payload>, CallError>>;

/// Adapter for `Future<T>` and `Future<Response<T>>`. Dropping the future cancels the call.
#[derive(Debug, Default, Clone, Copy)]
pub struct FutureCallAdapterFactory;

struct BodyFutureAdapter {
    response_type: TypeRef,
}

impl CallAdapter for BodyFutureAdapter {
    fn response_type(&self) -> &TypeRef {
        &self.response_type
    }

    fn adapt(&self, call: CallHandle) -> Payload {
        let future: BodyFuture = suspend::await_optional(call).boxed();
        Box::new(future)
    }
}

struct ResponseFutureAdapter {
    response_type: TypeRef,
}

impl CallAdapter for ResponseFutureAdapter {
    fn response_type(&self) -> &TypeRef {
        &self.response_type
    }

    fn adapt(&self, call: CallHandle) -> Payload {
        let future: ResponseFuture = suspend::await_response(call).boxed();
        Box::new(future)
    }
}

impl CallAdapterFactory for FutureCallAdapterFactory {
    fn get(
        &self,
        return_type: &TypeRef,
        _annotations: &Annotations,
        _registry: &Registry,
    ) -> anyhow::Result<Option<Arc<dyn CallAdapter>>> {
        if return_type.raw() != &RawType::Future {
            return Ok(None);
        }
        let Some(inner) = return_type.arg(0) else {
            bail!("Future return type must be parameterized as Future<Foo>");
        };
        if inner.raw() != &RawType::Response {
            return Ok(Some(Arc::new(BodyFutureAdapter {
                response_type: inner.clone(),
            })));
        }
        let Some(response_type) = inner.arg(0) else {
            bail!("Response must be parameterized as Response<Foo>");
        };
        Ok(Some(Arc::new(ResponseFutureAdapter {
            response_type: response_type.clone(),
        })))
    }
}
