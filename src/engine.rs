//! # Engine
//!
//! [`Engine`] owns everything a service needs at run time: the base URL, the
//! transport, the converter and call adapter registries, the callback executor and
//! the [`StrategyCache`]. It is cheap to clone and safe to share between threads.
//!
//! Services are plain structs implementing [`Service`]. Each method body forwards to
//! the [`ServiceInvoker`] it was created with:
//!
//! ```rust,no_run
//! use retrowire::{Arg, Args, CallError, Engine, MethodDescriptor, Service, ServiceInvoker, TypeRef, TypedCall};
//!
//! struct GitHub {
//!     invoker: ServiceInvoker,
//! }
//!
//! impl Service for GitHub {
//!     const NAME: &'static str = "GitHub";
//!
//!     fn methods() -> Vec<MethodDescriptor> {
//!         vec![MethodDescriptor::get("readme", "repos/{owner}/{repo}/readme")
//!             .path::<String>("owner")
//!             .path::<String>("repo")
//!             .returns(TypeRef::call(TypeRef::string()))]
//!     }
//!
//!     fn from_invoker(invoker: ServiceInvoker) -> Self {
//!         Self { invoker }
//!     }
//! }
//!
//! impl GitHub {
//!     fn readme(&self, owner: &str, repo: &str) -> Result<TypedCall<String>, CallError> {
//!         let args = Args::from(vec![Arg::new(owner.to_string()), Arg::new(repo.to_string())]);
//!         self.invoker.call("readme", args)
//!     }
//! }
//!
//! # fn main() -> anyhow::Result<()> {
//! let engine = Engine::builder().base_url("https://api.github.com/")?.build()?;
//! let github: GitHub = engine.create()?;
//! let readme = github.readme("rust-lang", "rust")?.execute()?;
//! println!("{:?}", readme.body());
//! # Ok(())
//! # }
//! ```

use crate::adapter::CallAdapterFactory;
use crate::args::Args;
use crate::cache::StrategyCache;
use crate::call::{CallHandle, Response, TypedCall};
use crate::config::EngineConfig;
use crate::converter::ConverterFactory;
use crate::error::{CallError, MethodError};
use crate::executor::CallbackExecutor;
use crate::method::{Invocation, ServiceMethod};
use crate::registry::Registry;
use crate::template::{MethodDescriptor, MethodId};
use crate::transport::{CallFactory, ReqwestCallFactory};
use anyhow::{anyhow, bail, Context};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// A remote service contract.
///
/// Implementations declare their methods once and forward every call to the
/// [`ServiceInvoker`] handed to [`Service::from_invoker`].
pub trait Service: Sized {
    /// Service name, the first half of every [`MethodId`].
    const NAME: &'static str;

    fn methods() -> Vec<MethodDescriptor>;

    fn from_invoker(invoker: ServiceInvoker) -> Self;
}

struct EngineInner {
    base_url: Url,
    call_factory: Arc<dyn CallFactory>,
    registry: Registry,
    callback_executor: Option<Arc<dyn CallbackExecutor>>,
    validate_eagerly: bool,
    cache: StrategyCache,
}

/// Builds service implementations and owns their compiled strategies.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// A builder preloaded with this engine's configuration.
    ///
    /// Only user-supplied factories are copied; the builder adds the built-in ones again
    /// on [`EngineBuilder::build`].
    #[must_use]
    pub fn new_builder(&self) -> EngineBuilder {
        let inner = &self.inner;
        EngineBuilder {
            base_url: Some(inner.base_url.clone()),
            call_factory: Some(Arc::clone(&inner.call_factory)),
            converter_factories: inner.registry.user_converter_factories().to_vec(),
            call_adapter_factories: inner.registry.user_call_adapter_factories().to_vec(),
            callback_executor: inner.callback_executor.clone(),
            validate_eagerly: inner.validate_eagerly,
            call_timeout: None,
        }
    }

    /// Create an implementation of `S`.
    ///
    /// # Errors
    ///
    /// When `S` declares a method name twice, or, with eager validation, when any of its
    /// methods fails to compile.
    pub fn create<S: Service>(&self) -> Result<S, MethodError> {
        let mut descriptors = HashMap::new();
        for descriptor in S::methods() {
            let descriptor = descriptor.with_service(S::NAME);
            let id = descriptor.id();
            if descriptors.insert(id.method(), descriptor).is_some() {
                return Err(MethodError::new(
                    id,
                    "Service declares this method more than once.",
                ));
            }
        }

        if self.inner.validate_eagerly {
            for descriptor in descriptors.values() {
                self.load_service_method(descriptor)?;
            }
            debug!(service = S::NAME, methods = descriptors.len(), "Service validated eagerly");
        }

        info!(service = S::NAME, methods = descriptors.len(), "Service created");
        Ok(S::from_invoker(ServiceInvoker {
            engine: self.clone(),
            service: S::NAME,
            descriptors: Arc::new(descriptors),
        }))
    }

    /// The compiled strategy for `descriptor`, compiling and caching it on first use.
    ///
    /// # Errors
    ///
    /// [`MethodError`] when the method cannot be compiled. Failures are not cached.
    pub fn load_service_method(
        &self,
        descriptor: &MethodDescriptor,
    ) -> Result<Arc<ServiceMethod>, MethodError> {
        let inner = &self.inner;
        inner.cache.get_or_compile(descriptor.id(), || {
            ServiceMethod::compile(
                descriptor,
                &inner.base_url,
                &inner.registry,
                Arc::clone(&inner.call_factory),
            )
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    #[must_use]
    pub fn call_factory(&self) -> &Arc<dyn CallFactory> {
        &self.inner.call_factory
    }

    #[must_use]
    pub fn callback_executor(&self) -> Option<&Arc<dyn CallbackExecutor>> {
        self.inner.callback_executor.as_ref()
    }

    #[must_use]
    pub fn validate_eagerly(&self) -> bool {
        self.inner.validate_eagerly
    }

    #[must_use]
    pub fn cache(&self) -> &StrategyCache {
        &self.inner.cache
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("base_url", &self.inner.base_url.as_str())
            .field("registry", &self.inner.registry)
            .field("validate_eagerly", &self.inner.validate_eagerly)
            .field("cache", &self.inner.cache)
            .finish()
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    base_url: Option<Url>,
    call_factory: Option<Arc<dyn CallFactory>>,
    converter_factories: Vec<Arc<dyn ConverterFactory>>,
    call_adapter_factories: Vec<Arc<dyn CallAdapterFactory>>,
    callback_executor: Option<Arc<dyn CallbackExecutor>>,
    validate_eagerly: bool,
    call_timeout: Option<Duration>,
}

impl EngineBuilder {
    #[must_use]
    pub fn new() -> Self {
        let defaults = EngineConfig::default();
        Self {
            base_url: None,
            call_factory: None,
            converter_factories: Vec::new(),
            call_adapter_factories: Vec::new(),
            callback_executor: None,
            validate_eagerly: defaults.validate_eagerly,
            call_timeout: defaults.call_timeout,
        }
    }

    /// Set the URL every relative method path resolves against.
    ///
    /// # Errors
    ///
    /// When `url` does not parse or its path does not end in `/`.
    pub fn base_url(mut self, url: impl AsRef<str>) -> anyhow::Result<Self> {
        let raw = url.as_ref();
        let url = Url::parse(raw).with_context(|| format!("Illegal URL: {raw}"))?;
        if !url.path().ends_with('/') {
            bail!("baseUrl must end in /: {url}");
        }
        self.base_url = Some(url);
        Ok(self)
    }

    /// Transport used to create calls. Defaults to [`ReqwestCallFactory`].
    #[must_use]
    pub fn call_factory(mut self, factory: Arc<dyn CallFactory>) -> Self {
        self.call_factory = Some(factory);
        self
    }

    /// Append a converter factory. Consulted after the built-in converters, in the
    /// order added.
    #[must_use]
    pub fn add_converter_factory(mut self, factory: Arc<dyn ConverterFactory>) -> Self {
        self.converter_factories.push(factory);
        self
    }

    /// Append a call adapter factory. Consulted before the default adapters, in the
    /// order added.
    #[must_use]
    pub fn add_call_adapter_factory(mut self, factory: Arc<dyn CallAdapterFactory>) -> Self {
        self.call_adapter_factories.push(factory);
        self
    }

    /// Where `Call` callbacks are delivered. Without one they run on the transport's
    /// thread.
    #[must_use]
    pub fn callback_executor(mut self, executor: Arc<dyn CallbackExecutor>) -> Self {
        self.callback_executor = Some(executor);
        self
    }

    /// Compile every method when a service is created rather than on first use.
    #[must_use]
    pub fn validate_eagerly(mut self, validate: bool) -> Self {
        self.validate_eagerly = validate;
        self
    }

    /// Whole-call timeout for the default transport. Ignored with a custom
    /// [`call_factory`](Self::call_factory).
    #[must_use]
    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Apply environment configuration.
    #[must_use]
    pub fn from_config(self, config: &EngineConfig) -> Self {
        self.validate_eagerly(config.validate_eagerly)
            .call_timeout(config.call_timeout)
    }

    /// # Errors
    ///
    /// When no base URL was set or the default transport cannot be created.
    pub fn build(self) -> anyhow::Result<Engine> {
        let base_url = self.base_url.ok_or_else(|| anyhow!("Base URL required."))?;
        let call_factory: Arc<dyn CallFactory> = match self.call_factory {
            Some(factory) => factory,
            None => Arc::new(
                ReqwestCallFactory::new(self.call_timeout)
                    .context("Failed to create default transport")?,
            ),
        };
        let registry = Registry::new(
            self.converter_factories,
            self.call_adapter_factories,
            self.callback_executor.clone(),
        );

        info!(
            base_url = %base_url,
            converter_factories = registry.converter_factories().len(),
            call_adapter_factories = registry.call_adapter_factories().len(),
            callback_executor = self.callback_executor.is_some(),
            validate_eagerly = self.validate_eagerly,
            "Engine built"
        );

        Ok(Engine {
            inner: Arc::new(EngineInner {
                base_url,
                call_factory,
                registry,
                callback_executor: self.callback_executor,
                validate_eagerly: self.validate_eagerly,
                cache: StrategyCache::new(),
            }),
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Method invoker of one service: looks up the compiled strategy for a method and
/// runs an invocation through it.
#[derive(Clone)]
pub struct ServiceInvoker {
    engine: Engine,
    service: &'static str,
    descriptors: Arc<HashMap<&'static str, MethodDescriptor>>,
}

impl ServiceInvoker {
    /// Invoke `method` with `args`.
    ///
    /// # Errors
    ///
    /// [`CallError::Definition`] when the method is undeclared or cannot be compiled.
    pub fn invoke(&self, method: &'static str, args: Args) -> Result<Invocation, CallError> {
        let descriptor = self.descriptors.get(method).ok_or_else(|| {
            MethodError::new(
                MethodId::new(self.service, method),
                "Method is not declared by the service.",
            )
        })?;
        let compiled = self.engine.load_service_method(descriptor)?;
        Ok(compiled.invoke(args))
    }

    /// Invoke a method declared as `Call<T>`.
    pub fn call<T: 'static>(&self, method: &'static str, args: Args) -> Result<TypedCall<T>, CallError> {
        let handle = self.adapted::<CallHandle>(method, args)?;
        Ok(TypedCall::new(handle))
    }

    /// Invoke a non-suspending method and take the adapter's product as `R`.
    pub fn adapted<R: 'static>(&self, method: &'static str, args: Args) -> Result<R, CallError> {
        let mismatch = || CallError::BodyType {
            expected: std::any::type_name::<R>(),
        };
        let payload = self.invoke(method, args)?.into_adapted().ok_or_else(mismatch)?;
        payload
            .downcast::<R>()
            .map(|adapted| *adapted)
            .map_err(|_| mismatch())
    }

    /// Invoke a method suspending for `Response<T>`.
    pub async fn response<T: 'static>(
        &self,
        method: &'static str,
        args: Args,
    ) -> Result<Response<T>, CallError> {
        let resumption = self.suspended(method, args)?.await?;
        resumption.into_response()?.downcast::<T>()
    }

    /// Invoke a method suspending for a body of type `T`.
    pub async fn body<T: 'static>(&self, method: &'static str, args: Args) -> Result<T, CallError> {
        self.suspended(method, args)?.await?.into_body::<T>()
    }

    /// Invoke a method suspending for `Option<T>`.
    pub async fn optional_body<T: 'static>(
        &self,
        method: &'static str,
        args: Args,
    ) -> Result<Option<T>, CallError> {
        self.suspended(method, args)?.await?.into_optional::<T>()
    }

    fn suspended(
        &self,
        method: &'static str,
        args: Args,
    ) -> Result<crate::method::SuspendedCall, CallError> {
        self.invoke(method, args)?
            .into_suspended()
            .ok_or(CallError::BodyType {
                expected: "suspending method",
            })
    }

    #[must_use]
    pub fn service(&self) -> &'static str {
        self.service
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Declared method names.
    pub fn methods(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.descriptors.keys().copied()
    }
}

impl fmt::Debug for ServiceInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceInvoker")
            .field("service", &self.service)
            .field("methods", &self.descriptors.len())
            .finish()
    }
}
