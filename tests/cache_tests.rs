//! Tests for the dispatch strategy cache
//!
//! # Test Coverage
//!
//! - Concurrent first use of one method compiles exactly once and every caller sees
//!   the same strategy
//! - Failed compilations are not cached and fail again on the next attempt
//! - Distinct methods are cached independently
//! - Engine invocations reuse the cached strategy

mod common;

use common::test_runtime::{base_url, BASE_URL};
use common::transport::{Delivery, MockCallFactory};
use retrowire::{
    Annotations, Args, CallAdapter, CallAdapterFactory, Engine, MethodDescriptor, MethodError,
    MethodId, Registry, Service, ServiceInvoker, ServiceMethod, StrategyCache, TypeRef,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn readme() -> MethodDescriptor {
    MethodDescriptor::get("readme", "repos/octocat/hello/readme")
        .returns(TypeRef::call(TypeRef::string()))
        .with_service("GitHub")
}

fn compile(descriptor: &MethodDescriptor) -> Result<ServiceMethod, MethodError> {
    ServiceMethod::compile(
        descriptor,
        &base_url(),
        &Registry::new(vec![], vec![], None),
        MockCallFactory::empty(Delivery::Immediate, 200),
    )
}

#[test]
fn test_concurrent_first_use_compiles_once() {
    const THREADS: usize = 8;

    let cache = Arc::new(StrategyCache::new());
    let compilations = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));
    let descriptor = readme();

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let compilations = Arc::clone(&compilations);
            let barrier = Arc::clone(&barrier);
            let descriptor = descriptor.clone();
            thread::spawn(move || {
                barrier.wait();
                cache
                    .get_or_compile(descriptor.id(), || {
                        compilations.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        compile(&descriptor)
                    })
                    .unwrap()
            })
        })
        .collect();

    let strategies: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(compilations.load(Ordering::SeqCst), 1);
    for strategy in &strategies[1..] {
        assert!(Arc::ptr_eq(&strategies[0], strategy));
    }
    let cached = cache.get(descriptor.id()).unwrap();
    assert!(Arc::ptr_eq(&strategies[0], &cached));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.stats().get_compilations(), 1);
}

#[test]
fn test_failed_compilation_is_not_cached() {
    let cache = StrategyCache::new();
    let id = MethodId::new("GitHub", "broken");
    let attempts = AtomicUsize::new(0);

    for _ in 0..2 {
        let err = cache
            .get_or_compile(id, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(MethodError::new(id, "Service methods cannot return void."))
            })
            .err()
            .unwrap();
        assert_eq!(err.message(), "Service methods cannot return void.");
    }

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(cache.is_empty());
    assert!(cache.get(id).is_none());
    assert_eq!(cache.stats().get_failures(), 2);
}

#[test]
fn test_hit_skips_compilation() {
    let cache = StrategyCache::new();
    let descriptor = readme();

    let first = cache
        .get_or_compile(descriptor.id(), || compile(&descriptor))
        .unwrap();
    let second = cache
        .get_or_compile(descriptor.id(), || panic!("cached strategy must be reused"))
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.stats().get_hits(), 1);
    assert_eq!(cache.stats().get_misses(), 1);
}

#[test]
fn test_distinct_methods_cached_independently() {
    let cache = StrategyCache::new();
    let readme = readme();
    let license = MethodDescriptor::get("license", "repos/octocat/hello/license")
        .returns(TypeRef::call(TypeRef::string()))
        .with_service("GitHub");

    let a = cache.get_or_compile(readme.id(), || compile(&readme)).unwrap();
    let b = cache.get_or_compile(license.id(), || compile(&license)).unwrap();

    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(cache.len(), 2);
    assert_eq!(a.id().method(), "readme");
    assert_eq!(b.id().method(), "license");
}

/// Counts adapter lookups, one per compilation, then defers to the defaults.
#[derive(Default)]
struct CountingAdapters {
    lookups: AtomicUsize,
}

impl CallAdapterFactory for CountingAdapters {
    fn get(
        &self,
        _return_type: &TypeRef,
        _annotations: &Annotations,
        _registry: &Registry,
    ) -> anyhow::Result<Option<Arc<dyn CallAdapter>>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

struct GitHub {
    invoker: ServiceInvoker,
}

impl Service for GitHub {
    const NAME: &'static str = "GitHub";

    fn methods() -> Vec<MethodDescriptor> {
        vec![MethodDescriptor::get("readme", "repos/octocat/hello/readme")
            .returns(TypeRef::call(TypeRef::string()))]
    }

    fn from_invoker(invoker: ServiceInvoker) -> Self {
        Self { invoker }
    }
}

#[test]
fn test_engine_reuses_strategy_across_invocations_and_services() {
    let counting = Arc::new(CountingAdapters::default());
    let engine = Engine::builder()
        .base_url(BASE_URL)
        .unwrap()
        .call_factory(MockCallFactory::empty(Delivery::Immediate, 200))
        .add_call_adapter_factory(Arc::clone(&counting) as Arc<dyn CallAdapterFactory>)
        .build()
        .unwrap();

    let first: GitHub = engine.create().unwrap();
    let second: GitHub = engine.create().unwrap();
    for service in [&first, &second, &first] {
        service.invoker.invoke("readme", Args::empty()).unwrap();
    }

    assert_eq!(counting.lookups.load(Ordering::SeqCst), 1);
    assert_eq!(engine.cache().len(), 1);
    assert_eq!(engine.cache().stats().get_hits(), 2);
}
