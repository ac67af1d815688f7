//! # Converter and Call Adapter Registries
//!
//! Both registries are ordered, append-only lists fixed at engine construction. A
//! resolution probes factories in order and returns the first product; a `next_*`
//! resolution starts just after a given factory so a factory can delegate to whatever
//! comes after it. Registries are read-only once built and need no locking.
//!
//! Factory order for an engine built through the builder:
//!
//! | Registry | Order |
//! |---|---|
//! | converters | `BuiltInConverters`, user factories, `OptionalConverterFactory` |
//! | call adapters | user factories, `FutureCallAdapterFactory`, `DefaultCallAdapterFactory` |

use crate::adapter::{CallAdapter, CallAdapterFactory, DefaultCallAdapterFactory, FutureCallAdapterFactory};
use crate::annotations::Annotations;
use crate::converter::{
    BuiltInConverters, ConverterFactory, OptionalConverterFactory, RequestConverter,
    ResponseConverter, StringConverter, ToStringConverter,
};
use crate::error::{ResolutionError, ResolutionTarget};
use crate::executor::CallbackExecutor;
use crate::types::TypeRef;
use std::sync::Arc;
use tracing::debug;

/// Ordered converter and call adapter factories.
#[derive(Clone)]
pub struct Registry {
    converter_factories: Vec<Arc<dyn ConverterFactory>>,
    call_adapter_factories: Vec<Arc<dyn CallAdapterFactory>>,
    /// Leading built-in converter factories
    leading_converters: usize,
    /// Trailing default converter factories
    trailing_converters: usize,
    /// Trailing default call adapter factories
    trailing_adapters: usize,
}

/// Index of the first factory to probe: just past `skip_past`, or 0 when it is not registered.
fn start_index<F: ?Sized, S: ?Sized>(factories: &[Arc<F>], skip_past: Option<&S>) -> usize {
    skip_past
        .and_then(|skip| {
            factories
                .iter()
                .position(|f| std::ptr::addr_eq(Arc::as_ptr(f), skip as *const S))
        })
        .map_or(0, |index| index + 1)
}

fn not_found(
    target: ResolutionTarget,
    ty: &TypeRef,
    names: Vec<&'static str>,
    start: usize,
    skip_given: bool,
) -> ResolutionError {
    let mut names = names;
    let tried = names.split_off(start.min(names.len()));
    ResolutionError::NotFound {
        target,
        ty: ty.clone(),
        skipped: skip_given.then_some(names),
        tried,
    }
}

impl Registry {
    /// Assemble the registries the way an engine does: built-in and default factories
    /// around the user's.
    #[must_use]
    pub fn new(
        user_converters: Vec<Arc<dyn ConverterFactory>>,
        user_adapters: Vec<Arc<dyn CallAdapterFactory>>,
        callback_executor: Option<Arc<dyn CallbackExecutor>>,
    ) -> Self {
        let mut converter_factories: Vec<Arc<dyn ConverterFactory>> =
            Vec::with_capacity(user_converters.len() + 2);
        converter_factories.push(Arc::new(BuiltInConverters));
        converter_factories.extend(user_converters);
        converter_factories.push(Arc::new(OptionalConverterFactory));

        let mut call_adapter_factories = user_adapters;
        call_adapter_factories.push(Arc::new(FutureCallAdapterFactory));
        call_adapter_factories.push(Arc::new(DefaultCallAdapterFactory::new(callback_executor)));

        Self {
            converter_factories,
            call_adapter_factories,
            leading_converters: 1,
            trailing_converters: 1,
            trailing_adapters: 2,
        }
    }

    /// Use exactly these factories, in this order, with no defaults.
    #[must_use]
    pub fn from_factories(
        converter_factories: Vec<Arc<dyn ConverterFactory>>,
        call_adapter_factories: Vec<Arc<dyn CallAdapterFactory>>,
    ) -> Self {
        Self {
            converter_factories,
            call_adapter_factories,
            leading_converters: 0,
            trailing_converters: 0,
            trailing_adapters: 0,
        }
    }

    #[must_use]
    pub fn converter_factories(&self) -> &[Arc<dyn ConverterFactory>] {
        &self.converter_factories
    }

    #[must_use]
    pub fn call_adapter_factories(&self) -> &[Arc<dyn CallAdapterFactory>] {
        &self.call_adapter_factories
    }

    /// Converter factories added by the user, without built-ins and defaults.
    #[must_use]
    pub fn user_converter_factories(&self) -> &[Arc<dyn ConverterFactory>] {
        let end = self.converter_factories.len() - self.trailing_converters;
        &self.converter_factories[self.leading_converters..end]
    }

    /// Call adapter factories added by the user, without defaults.
    #[must_use]
    pub fn user_call_adapter_factories(&self) -> &[Arc<dyn CallAdapterFactory>] {
        let end = self.call_adapter_factories.len() - self.trailing_adapters;
        &self.call_adapter_factories[..end]
    }

    /// Call adapter for `return_type`, probing every factory.
    ///
    /// # Errors
    ///
    /// [`ResolutionError::NotFound`] listing every probed factory, or
    /// [`ResolutionError::FactoryFailed`] when a factory recognised the type but failed.
    pub fn call_adapter(
        &self,
        return_type: &TypeRef,
        annotations: &Annotations,
    ) -> Result<Arc<dyn CallAdapter>, ResolutionError> {
        self.next_call_adapter(None, return_type, annotations)
    }

    /// Call adapter for `return_type`, probing only factories after `skip_past`.
    pub fn next_call_adapter(
        &self,
        skip_past: Option<&dyn CallAdapterFactory>,
        return_type: &TypeRef,
        annotations: &Annotations,
    ) -> Result<Arc<dyn CallAdapter>, ResolutionError> {
        let factories = &self.call_adapter_factories;
        let start = start_index(factories, skip_past);
        for factory in &factories[start..] {
            let found = factory
                .get(return_type, annotations, self)
                .map_err(|source| ResolutionError::FactoryFailed {
                    target: ResolutionTarget::CallAdapter,
                    ty: return_type.clone(),
                    factory: factory.name(),
                    source,
                })?;
            if let Some(adapter) = found {
                debug!(
                    return_type = %return_type,
                    factory = factory.name(),
                    response_type = %adapter.response_type(),
                    "Resolved call adapter"
                );
                return Ok(adapter);
            }
        }
        Err(not_found(
            ResolutionTarget::CallAdapter,
            return_type,
            factories.iter().map(|f| f.name()).collect(),
            start,
            skip_past.is_some(),
        ))
    }

    /// Encoder for a body parameter of type `ty`.
    pub fn request_body_converter(
        &self,
        ty: &TypeRef,
        parameter_annotations: &Annotations,
        method_annotations: &Annotations,
    ) -> Result<Arc<dyn RequestConverter>, ResolutionError> {
        self.next_request_body_converter(None, ty, parameter_annotations, method_annotations)
    }

    pub fn next_request_body_converter(
        &self,
        skip_past: Option<&dyn ConverterFactory>,
        ty: &TypeRef,
        parameter_annotations: &Annotations,
        method_annotations: &Annotations,
    ) -> Result<Arc<dyn RequestConverter>, ResolutionError> {
        let factories = &self.converter_factories;
        let start = start_index(factories, skip_past);
        for factory in &factories[start..] {
            let found = factory
                .request_body_converter(ty, parameter_annotations, method_annotations, self)
                .map_err(|source| ResolutionError::FactoryFailed {
                    target: ResolutionTarget::RequestBodyConverter,
                    ty: ty.clone(),
                    factory: factory.name(),
                    source,
                })?;
            if let Some(converter) = found {
                debug!(ty = %ty, factory = factory.name(), "Resolved request body converter");
                return Ok(converter);
            }
        }
        Err(not_found(
            ResolutionTarget::RequestBodyConverter,
            ty,
            factories.iter().map(|f| f.name()).collect(),
            start,
            skip_past.is_some(),
        ))
    }

    /// Decoder for response bodies of type `ty`.
    pub fn response_body_converter(
        &self,
        ty: &TypeRef,
        annotations: &Annotations,
    ) -> Result<Arc<dyn ResponseConverter>, ResolutionError> {
        self.next_response_body_converter(None, ty, annotations)
    }

    pub fn next_response_body_converter(
        &self,
        skip_past: Option<&dyn ConverterFactory>,
        ty: &TypeRef,
        annotations: &Annotations,
    ) -> Result<Arc<dyn ResponseConverter>, ResolutionError> {
        let factories = &self.converter_factories;
        let start = start_index(factories, skip_past);
        for factory in &factories[start..] {
            let found = factory
                .response_body_converter(ty, annotations, self)
                .map_err(|source| ResolutionError::FactoryFailed {
                    target: ResolutionTarget::ResponseBodyConverter,
                    ty: ty.clone(),
                    factory: factory.name(),
                    source,
                })?;
            if let Some(converter) = found {
                debug!(ty = %ty, factory = factory.name(), "Resolved response body converter");
                return Ok(converter);
            }
        }
        Err(not_found(
            ResolutionTarget::ResponseBodyConverter,
            ty,
            factories.iter().map(|f| f.name()).collect(),
            start,
            skip_past.is_some(),
        ))
    }

    /// Stringifier for `ty`. Falls back to [`ToStringConverter`] when no factory claims it.
    ///
    /// # Errors
    ///
    /// Only when a factory recognised the type and then failed.
    pub fn string_converter(
        &self,
        ty: &TypeRef,
        annotations: &Annotations,
    ) -> Result<Arc<dyn StringConverter>, ResolutionError> {
        for factory in &self.converter_factories {
            let found = factory
                .string_converter(ty, annotations, self)
                .map_err(|source| ResolutionError::FactoryFailed {
                    target: ResolutionTarget::StringConverter,
                    ty: ty.clone(),
                    factory: factory.name(),
                    source,
                })?;
            if let Some(converter) = found {
                return Ok(converter);
            }
        }
        Ok(Arc::new(ToStringConverter))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field(
                "converter_factories",
                &self.converter_factories.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .field(
                "call_adapter_factories",
                &self.call_adapter_factories.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
