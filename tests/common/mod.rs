#![allow(dead_code)]

pub mod transport {
    //! Scripted in-memory transport.

    use http::{HeaderValue, StatusCode};
    use parking_lot::Mutex;
    use retrowire::transport::{RawCallback, TimeoutPolicy};
    use retrowire::{CallFactory, RawCall, RawResponse, Request, ResponseBody, TransportError};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    type Responder = dyn Fn(&Request) -> Result<RawResponse, TransportError> + Send + Sync;

    /// How `enqueue` reports completion.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Delivery {
        /// Inline, on the enqueueing thread
        Immediate,
        /// On a freshly spawned thread
        Thread,
        /// Only when the test calls [`MockCallFactory::complete_next`]
        Manual,
    }

    type Completion = Box<dyn FnOnce() + Send>;

    pub struct MockCallFactory {
        responder: Arc<Responder>,
        delivery: Delivery,
        requests: Arc<Mutex<Vec<Request>>>,
        pending: Arc<Mutex<VecDeque<Completion>>>,
        calls_created: AtomicUsize,
        last_cancelled: Mutex<Option<Arc<AtomicBool>>>,
    }

    impl MockCallFactory {
        pub fn new<F>(delivery: Delivery, responder: F) -> Arc<Self>
        where
            F: Fn(&Request) -> Result<RawResponse, TransportError> + Send + Sync + 'static,
        {
            Arc::new(Self {
                responder: Arc::new(responder),
                delivery,
                requests: Arc::new(Mutex::new(Vec::new())),
                pending: Arc::new(Mutex::new(VecDeque::new())),
                calls_created: AtomicUsize::new(0),
                last_cancelled: Mutex::new(None),
            })
        }

        /// Answers every request with `status` and a JSON `body`.
        pub fn json(delivery: Delivery, status: u16, body: &'static str) -> Arc<Self> {
            Self::new(delivery, move |_| Ok(json_response(status, body)))
        }

        /// Answers every request with `status` and no body.
        pub fn empty(delivery: Delivery, status: u16) -> Arc<Self> {
            Self::new(delivery, move |_| Ok(empty_response(status)))
        }

        pub fn requests(&self) -> Vec<Request> {
            self.requests.lock().clone()
        }

        pub fn calls_created(&self) -> usize {
            self.calls_created.load(Ordering::SeqCst)
        }

        pub fn pending(&self) -> usize {
            self.pending.lock().len()
        }

        /// Deliver the oldest manually held completion.
        pub fn complete_next(&self) -> bool {
            let next = self.pending.lock().pop_front();
            match next {
                Some(complete) => {
                    complete();
                    true
                }
                None => false,
            }
        }

        /// Whether the most recently created raw call was cancelled.
        pub fn last_call_cancelled(&self) -> bool {
            self.last_cancelled
                .lock()
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::SeqCst))
        }
    }

    impl CallFactory for MockCallFactory {
        fn new_call(&self, request: Request) -> Arc<dyn RawCall> {
            self.calls_created.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().push(request.clone());
            let cancelled = Arc::new(AtomicBool::new(false));
            *self.last_cancelled.lock() = Some(Arc::clone(&cancelled));
            Arc::new(MockRawCall {
                request,
                responder: Arc::clone(&self.responder),
                delivery: self.delivery,
                pending: Arc::clone(&self.pending),
                cancelled,
                executed: AtomicBool::new(false),
            })
        }
    }

    pub struct MockRawCall {
        request: Request,
        responder: Arc<Responder>,
        delivery: Delivery,
        pending: Arc<Mutex<VecDeque<Completion>>>,
        cancelled: Arc<AtomicBool>,
        executed: AtomicBool,
    }

    fn respond(
        responder: &Responder,
        request: &Request,
        cancelled: &AtomicBool,
    ) -> Result<RawResponse, TransportError> {
        if cancelled.load(Ordering::SeqCst) {
            return Err(TransportError::Cancelled);
        }
        responder(request)
    }

    impl RawCall for MockRawCall {
        fn request(&self) -> &Request {
            &self.request
        }

        fn execute(&self) -> Result<RawResponse, TransportError> {
            if self.executed.swap(true, Ordering::SeqCst) {
                return Err(TransportError::Failed(anyhow::anyhow!("Already Executed")));
            }
            respond(self.responder.as_ref(), &self.request, &self.cancelled)
        }

        fn enqueue(&self, callback: RawCallback) {
            let responder = Arc::clone(&self.responder);
            let request = self.request.clone();
            let cancelled = Arc::clone(&self.cancelled);
            let complete = move || callback(respond(responder.as_ref(), &request, &cancelled));
            match self.delivery {
                Delivery::Immediate => complete(),
                Delivery::Thread => {
                    std::thread::spawn(complete);
                }
                Delivery::Manual => self.pending.lock().push_back(Box::new(complete)),
            }
        }

        fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }

        fn timeout(&self) -> TimeoutPolicy {
            TimeoutPolicy::none()
        }
    }

    pub fn json_response(status: u16, body: &str) -> RawResponse {
        RawResponse::new(
            StatusCode::from_u16(status).unwrap(),
            Some(ResponseBody::new(
                Some(HeaderValue::from_static("application/json")),
                body.to_string(),
            )),
        )
    }

    pub fn empty_response(status: u16) -> RawResponse {
        RawResponse::new(StatusCode::from_u16(status).unwrap(), None)
    }
}

pub mod executor {
    //! Callback executor drained by hand, so tests control when callbacks run.

    use parking_lot::Mutex;
    use retrowire::executor::Task;
    use retrowire::CallbackExecutor;
    use std::collections::VecDeque;

    #[derive(Default)]
    pub struct ManualExecutor {
        queue: Mutex<VecDeque<Task>>,
    }

    impl ManualExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn pending(&self) -> usize {
            self.queue.lock().len()
        }

        /// Run every queued task in submission order; returns how many ran.
        pub fn run_all(&self) -> usize {
            let mut ran = 0;
            loop {
                let next = self.queue.lock().pop_front();
                match next {
                    Some(task) => {
                        task();
                        ran += 1;
                    }
                    None => return ran,
                }
            }
        }
    }

    impl CallbackExecutor for ManualExecutor {
        fn execute(&self, task: Task) {
            self.queue.lock().push_back(task);
        }
    }
}

pub mod models {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Contributor {
        pub login: String,
        pub contributions: u32,
    }

    pub const CONTRIBUTOR_JSON: &str = r#"{"login":"octocat","contributions":42}"#;

    pub fn octocat() -> Contributor {
        Contributor {
            login: "octocat".to_string(),
            contributions: 42,
        }
    }
}

pub mod test_runtime {
    use std::sync::Once;
    use tracing::subscriber::DefaultGuard;

    static MAY_INIT: Once = Once::new();

    /// Ensures May coroutines are configured only once
    pub fn setup_may_runtime() {
        MAY_INIT.call_once(|| {
            may::config().set_stack_size(0x8000);
        });
    }

    /// Thread-local subscriber writing through the test harness's capture.
    pub fn test_tracing() -> DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub const BASE_URL: &str = "https://api.example.com/";

    pub fn base_url() -> url::Url {
        url::Url::parse(BASE_URL).unwrap()
    }
}
