use criterion::{criterion_group, criterion_main, Criterion};
use http::{HeaderValue, StatusCode};
use retrowire::transport::{RawCallback, TimeoutPolicy};
use retrowire::{
    Arg, Args, CallError, CallFactory, Engine, MethodDescriptor, RawCall, RawResponse, Registry,
    Request, ResponseBody, Service, ServiceInvoker, ServiceMethod, StrategyCache, TransportError,
    TypeRef, TypedCall,
};
use std::hint::black_box;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Transport answering every request with the same text body, inline.
struct StaticCallFactory;

struct StaticCall {
    request: Request,
    cancelled: AtomicBool,
}

fn readme_response() -> RawResponse {
    RawResponse::new(
        StatusCode::OK,
        Some(ResponseBody::new(
            Some(HeaderValue::from_static("text/plain")),
            "# Hello World",
        )),
    )
}

impl RawCall for StaticCall {
    fn request(&self) -> &Request {
        &self.request
    }

    fn execute(&self) -> Result<RawResponse, TransportError> {
        Ok(readme_response())
    }

    fn enqueue(&self, callback: RawCallback) {
        callback(Ok(readme_response()));
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn timeout(&self) -> TimeoutPolicy {
        TimeoutPolicy::none()
    }
}

impl CallFactory for StaticCallFactory {
    fn new_call(&self, request: Request) -> Arc<dyn RawCall> {
        Arc::new(StaticCall {
            request,
            cancelled: AtomicBool::new(false),
        })
    }
}

struct GitHub {
    invoker: ServiceInvoker,
}

impl Service for GitHub {
    const NAME: &'static str = "GitHub";

    fn methods() -> Vec<MethodDescriptor> {
        vec![
            MethodDescriptor::get("readme", "repos/{owner}/{repo}/readme")
                .path::<String>("owner")
                .path::<String>("repo")
                .query::<u32>("ref")
                .returns(TypeRef::call(TypeRef::string())),
        ]
    }

    fn from_invoker(invoker: ServiceInvoker) -> Self {
        Self { invoker }
    }
}

impl GitHub {
    fn readme(&self, owner: &str, repo: &str, reference: u32) -> Result<TypedCall<String>, CallError> {
        let args = Args::from(vec![
            Arg::new(owner.to_string()),
            Arg::new(repo.to_string()),
            Arg::new(reference),
        ]);
        self.invoker.call("readme", args)
    }
}

fn engine() -> Engine {
    Engine::builder()
        .base_url("https://api.github.com/")
        .expect("valid base URL")
        .call_factory(Arc::new(StaticCallFactory))
        .build()
        .expect("engine builds")
}

fn bench_cache_hit(c: &mut Criterion) {
    let descriptor = GitHub::methods()
        .remove(0)
        .with_service(GitHub::NAME);
    let base_url = url::Url::parse("https://api.github.com/").expect("valid base URL");
    let registry = Registry::new(vec![], vec![], None);
    let cache = StrategyCache::new();
    let compile = || {
        ServiceMethod::compile(&descriptor, &base_url, &registry, Arc::new(StaticCallFactory))
    };
    cache
        .get_or_compile(descriptor.id(), compile)
        .expect("method compiles");

    c.bench_function("strategy_cache_hit", |b| {
        b.iter(|| {
            let method = cache
                .get_or_compile(black_box(descriptor.id()), compile)
                .expect("cached");
            black_box(method);
        })
    });

    c.bench_function("strategy_compile", |b| {
        b.iter(|| black_box(compile().expect("method compiles")))
    });
}

fn bench_invoke(c: &mut Criterion) {
    let github: GitHub = engine().create().expect("service creates");

    c.bench_function("invoke_and_execute", |b| {
        b.iter(|| {
            let response = github
                .readme(black_box("rust-lang"), black_box("rust"), 1)
                .and_then(|call| call.execute())
                .expect("call succeeds");
            black_box(response);
        })
    });
}

criterion_group!(benches, bench_cache_hit, bench_invoke);
criterion_main!(benches);
