use super::{CallFactory, RawCall, RawCallback, RawResponse, Request, ResponseBody, TimeoutPolicy, TransportError};
use anyhow::Context;
use futures::future::{AbortHandle, AbortRegistration, Abortable};
use http::header::CONTENT_TYPE;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::debug;

const TRANSPORT_WORKERS: usize = 2;

/// Process-wide runtime driving every default-transport exchange. Never dropped, so
/// engines and calls can be released from any context, async or not.
static TRANSPORT_RUNTIME: OnceCell<Runtime> = OnceCell::new();

fn transport_runtime() -> anyhow::Result<&'static Runtime> {
    TRANSPORT_RUNTIME.get_or_try_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(TRANSPORT_WORKERS)
            .thread_name("retrowire-transport")
            .enable_all()
            .build()
            .context("failed to start the transport runtime")
    })
}

/// Default transport: async `reqwest` on a small shared runtime.
///
/// `execute` parks the calling thread until the exchange finishes; `enqueue` returns
/// immediately and delivers the outcome from a transport worker. Cancelling aborts
/// the exchange wherever it is and reports [`TransportError::Cancelled`].
#[derive(Clone)]
pub struct ReqwestCallFactory {
    client: reqwest::Client,
    runtime: Handle,
    timeout: TimeoutPolicy,
}

impl ReqwestCallFactory {
    /// Build the transport with an optional whole-call timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the runtime, the TLS backend or the client cannot be
    /// initialised.
    pub fn new(timeout: Option<Duration>) -> anyhow::Result<Self> {
        let runtime = transport_runtime()?;
        let _entered = runtime.enter();
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        Ok(Self {
            client: builder.build()?,
            runtime: runtime.handle().clone(),
            timeout: TimeoutPolicy { call: timeout },
        })
    }

    /// Wrap an existing client.
    ///
    /// # Errors
    ///
    /// When the transport runtime cannot be started.
    pub fn with_client(client: reqwest::Client, timeout: TimeoutPolicy) -> anyhow::Result<Self> {
        Ok(Self {
            client,
            runtime: transport_runtime()?.handle().clone(),
            timeout,
        })
    }
}

impl CallFactory for ReqwestCallFactory {
    fn new_call(&self, request: Request) -> Arc<dyn RawCall> {
        let (abort, registration) = AbortHandle::new_pair();
        Arc::new(ReqwestCall {
            client: self.client.clone(),
            runtime: self.runtime.clone(),
            request,
            timeout: self.timeout,
            cancelled: Arc::new(AtomicBool::new(false)),
            abort,
            registration: Mutex::new(Some(registration)),
        })
    }
}

struct ReqwestCall {
    client: reqwest::Client,
    runtime: Handle,
    request: Request,
    timeout: TimeoutPolicy,
    cancelled: Arc<AtomicBool>,
    abort: AbortHandle,
    /// Taken by the first `execute` or `enqueue`
    registration: Mutex<Option<AbortRegistration>>,
}

impl ReqwestCall {
    /// Spawn the exchange and hand its outcome to `deliver` on the transport runtime.
    fn start<R, F>(&self, deliver: F) -> Result<JoinHandle<R>, TransportError>
    where
        F: FnOnce(Result<RawResponse, TransportError>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let registration = self
            .registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| TransportError::Failed(anyhow::anyhow!("Already Executed")))?;

        let exchange = Abortable::new(send(self.client.clone(), self.request.clone()), registration);
        let cancelled = Arc::clone(&self.cancelled);
        let method = self.request.method.clone();
        let url = self.request.url.clone();

        Ok(self.runtime.spawn(async move {
            let mut outcome = exchange.await.unwrap_or(Err(TransportError::Cancelled));
            if cancelled.load(Ordering::Acquire) {
                outcome = Err(TransportError::Cancelled);
            }
            debug!(
                method = %method,
                url = %url,
                ok = outcome.is_ok(),
                "Transport call finished"
            );
            deliver(outcome)
        }))
    }
}

fn map_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Failed(err.into())
    }
}

async fn send(client: reqwest::Client, request: Request) -> Result<RawResponse, TransportError> {
    let mut builder = client
        .request(request.method.clone(), request.url.clone())
        .headers(request.headers.clone());
    if let Some(body) = &request.body {
        if let Some(content_type) = body.content_type() {
            if !request.headers.contains_key(CONTENT_TYPE) {
                builder = builder.header(CONTENT_TYPE, content_type.clone());
            }
        }
        builder = builder.body(body.bytes().clone());
    }

    let response = builder.send().await.map_err(map_error)?;
    let status = response.status();
    let headers = response.headers().clone();
    let content_type = headers.get(CONTENT_TYPE).cloned();
    let bytes = response.bytes().await.map_err(map_error)?;

    Ok(RawResponse {
        status,
        headers,
        body: Some(ResponseBody::new(content_type, bytes)),
    })
}

impl RawCall for ReqwestCall {
    fn request(&self) -> &Request {
        &self.request
    }

    fn execute(&self) -> Result<RawResponse, TransportError> {
        let task = self.start(|outcome| outcome)?;
        futures::executor::block_on(task)
            .unwrap_or_else(|join| Err(TransportError::Failed(join.into())))
    }

    fn enqueue(&self, callback: RawCallback) {
        let slot = Arc::new(Mutex::new(Some(callback)));
        let worker_slot = Arc::clone(&slot);
        let started = self.start(move |outcome| {
            let callback = worker_slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(callback) = callback {
                callback(outcome);
            }
        });

        if let Err(e) = started {
            let callback = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(callback) = callback {
                callback(Err(e));
            }
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.abort.abort();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn timeout(&self) -> TimeoutPolicy {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use std::sync::mpsc;

    fn unused_request() -> Request {
        Request {
            method: Method::GET,
            url: "http://127.0.0.1:9/unused".parse().unwrap(),
            headers: http::HeaderMap::new(),
            body: None,
        }
    }

    #[test]
    fn test_cancelled_call_never_reaches_the_network() {
        let factory = ReqwestCallFactory::new(Some(Duration::from_millis(50))).unwrap();
        let call = factory.new_call(unused_request());
        call.cancel();
        assert!(call.is_cancelled());
        assert!(matches!(call.execute(), Err(TransportError::Cancelled)));
        assert_eq!(call.timeout().call, Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_second_execution_is_rejected() {
        let factory = ReqwestCallFactory::new(None).unwrap();
        let call = factory.new_call(unused_request());
        call.cancel();
        let _ = call.execute();
        assert!(matches!(call.execute(), Err(TransportError::Failed(_))));
    }

    #[test]
    fn test_cancelled_enqueue_reports_through_callback() {
        let factory = ReqwestCallFactory::new(None).unwrap();
        let call = factory.new_call(unused_request());
        call.cancel();

        let (tx, rx) = mpsc::channel();
        call.enqueue(Box::new(move |outcome| {
            let _ = tx.send(matches!(outcome, Err(TransportError::Cancelled)));
        }));
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());

        let (tx, rx) = mpsc::channel();
        call.enqueue(Box::new(move |outcome| {
            let _ = tx.send(matches!(outcome, Err(TransportError::Failed(_))));
        }));
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }

    #[tokio::test]
    async fn test_factory_and_calls_drop_inside_async_task() {
        let factory = ReqwestCallFactory::new(None).unwrap();
        let call = factory.new_call(unused_request());
        drop(factory);
        call.cancel();
        drop(call);
    }
}
