//! # retrowire
//!
//! **retrowire** turns declaratively described HTTP services into executable calls.
//! Each service method is described once with a [`MethodDescriptor`]; on first use the
//! engine compiles it into an immutable dispatch strategy and caches it, so every later
//! invocation goes straight to building the network call.
//!
//! ## Architecture
//!
//! - **[`registry`]** - Ordered converter and call adapter resolution with skip-past
//! - **[`converter`]** - Body and string converter contracts, built-in and JSON converters
//! - **[`adapter`]** - Call adapter contracts, `Call<T>` and `Future<T>` adapters
//! - **[`executor`]** - Callback execution contexts and the callback-marshalling call wrapper
//! - **[`method`]** - Dispatch strategy compiler and method invoker
//! - **[`cache`]** - Compile-once strategy cache keyed by method identity
//! - **[`engine`]** - Engine builder, service creation and the per-service invoker
//! - **[`suspend`]** - Suspensions resumed exactly once with a value or a failure
//! - **[`transport`]** - Transport contract and the default `reqwest` implementation
//!
//! ### Invocation Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Service
//!     participant Invoker as ServiceInvoker
//!     participant Cache as StrategyCache
//!     participant Compiler as ServiceMethod::compile
//!     participant Registry
//!     participant Method as ServiceMethod
//!
//!     Service->>Invoker: invoke("contributors", args)
//!     Invoker->>Cache: get_or_compile(GitHub.contributors)
//!     alt first use
//!         Cache->>Compiler: compile(descriptor)
//!         Compiler->>Registry: call_adapter(return type)
//!         Compiler->>Registry: response_body_converter(body type)
//!         Compiler-->>Cache: ServiceMethod
//!     end
//!     Cache-->>Invoker: Arc<ServiceMethod>
//!     Invoker->>Method: invoke(args)
//!     Method-->>Service: Adapted payload or suspension
//! ```
//!
//! ## Dispatch Variants
//!
//! | Declared as | Variant | Caller receives |
//! |---|---|---|
//! | `returns(Call<T>)` or any adapted shape | `Adapted` | the adapter's product |
//! | `suspends(Response<T>)` | `SuspendForResponse` | the full envelope, even for non-2xx |
//! | `suspends(T)` | `SuspendForBody` | the body; absent is a failure |
//! | `suspends(Option<T>)` | `SuspendForBody { nullable }` | the body or nothing |
//! | `suspends(())` | `SuspendForBody { unit }` | `()` |
//!
//! ## Logging
//!
//! Every decision is a `tracing` event. See [`logging`] for a ready-made subscriber.

pub mod adapter;
pub mod annotations;
pub mod args;
pub mod cache;
pub mod call;
pub mod config;
pub mod converter;
pub mod engine;
pub mod error;
pub mod executor;
pub mod http_call;
pub mod ids;
pub mod logging;
pub mod method;
pub mod registry;
pub mod suspend;
pub mod template;
pub mod transport;
pub mod types;

pub use adapter::{CallAdapter, CallAdapterFactory, DefaultCallAdapterFactory, FutureCallAdapterFactory};
pub use annotations::{Annotation, Annotations};
pub use args::{Arg, Args};
pub use cache::StrategyCache;
pub use call::{Call, CallHandle, Callback, Payload, Response, TypedCall};
pub use config::EngineConfig;
pub use converter::{
    BuiltInConverters, ConverterFactory, JsonConverterFactory, OptionalConverterFactory,
    RequestConverter, ResponseConverter, StringConverter, ToStringConverter,
};
pub use engine::{Engine, EngineBuilder, Service, ServiceInvoker};
pub use error::{CallError, MethodError, ResolutionError, ResolutionTarget};
pub use executor::{CallbackExecutor, ExecutorCallbackCall, WorkerExecutor};
pub use ids::CallId;
pub use method::{Invocation, Resumption, ServiceMethod, Variant};
pub use registry::Registry;
pub use template::{MethodDescriptor, MethodId, RequestTemplate, Signature};
pub use transport::{CallFactory, RawCall, RawResponse, Request, RequestBody, ResponseBody, TransportError};
pub use types::{RawType, TypeRef};
