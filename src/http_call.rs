//! The concrete call handle every service method invocation starts from.

use crate::args::Args;
use crate::call::{Call, CallHandle, Callback, Response};
use crate::converter::ResponseConverter;
use crate::error::CallError;
use crate::ids::CallId;
use crate::template::RequestTemplate;
use crate::transport::{CallFactory, RawCall, RawResponse, Request, TimeoutPolicy};
use http::StatusCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error};

#[derive(Default)]
struct RawState {
    raw: Option<Arc<dyn RawCall>>,
    /// Request creation failure, re-reported on every later attempt
    creation_failure: Option<Arc<anyhow::Error>>,
}

/// A single-shot call bound to one method's request template and one argument list.
///
/// The transport call is created lazily, on first execution or request inspection.
pub struct HttpCall {
    id: CallId,
    template: Arc<RequestTemplate>,
    args: Args,
    call_factory: Arc<dyn CallFactory>,
    converter: Arc<dyn ResponseConverter>,
    state: Mutex<RawState>,
    executed: AtomicBool,
    cancelled: AtomicBool,
}

impl HttpCall {
    pub fn new(
        template: Arc<RequestTemplate>,
        args: Args,
        call_factory: Arc<dyn CallFactory>,
        converter: Arc<dyn ResponseConverter>,
    ) -> Self {
        Self {
            id: CallId::new(),
            template,
            args,
            call_factory,
            converter,
            state: Mutex::new(RawState::default()),
            executed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        }
    }

    fn raw_call(&self) -> Result<Arc<dyn RawCall>, CallError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(failure) = &state.creation_failure {
            return Err(CallError::Request(Arc::clone(failure)));
        }
        if let Some(raw) = &state.raw {
            return Ok(Arc::clone(raw));
        }
        match self.template.create(&self.args) {
            Ok(request) => {
                let raw = self.call_factory.new_call(request);
                state.raw = Some(Arc::clone(&raw));
                Ok(raw)
            }
            Err(e) => {
                debug!(
                    call_id = %self.id,
                    method = %self.template.method(),
                    error = %e,
                    "Request creation failed"
                );
                let failure = Arc::new(e);
                state.creation_failure = Some(Arc::clone(&failure));
                Err(CallError::Request(failure))
            }
        }
    }
}

/// Turn a transport response into an envelope.
///
/// Non-2xx responses keep their raw body as the error body; 204 and 205 have no body;
/// everything else goes through `converter`.
pub fn parse_response(
    converter: &dyn ResponseConverter,
    raw: RawResponse,
) -> Result<Response, CallError> {
    let RawResponse {
        status,
        headers,
        body,
    } = raw;

    if !status.is_success() {
        return Ok(Response::error(status, headers, body));
    }

    if status == StatusCode::NO_CONTENT || status == StatusCode::RESET_CONTENT {
        return Ok(Response::success(status, headers, None));
    }

    let decoded = match body {
        Some(body) => converter.convert(body).map_err(CallError::Conversion)?,
        None => None,
    };
    Ok(Response::success(status, headers, decoded))
}

impl Call for HttpCall {
    fn id(&self) -> CallId {
        self.id
    }

    fn execute(&self) -> Result<Response, CallError> {
        if self.executed.swap(true, Ordering::AcqRel) {
            return Err(CallError::AlreadyExecuted);
        }
        let raw = self.raw_call()?;
        if self.cancelled.load(Ordering::Acquire) {
            raw.cancel();
        }
        debug!(call_id = %self.id, method = %self.template.method(), "Executing call");
        parse_response(self.converter.as_ref(), raw.execute()?)
    }

    fn enqueue(&self, callback: Callback) {
        if self.executed.swap(true, Ordering::AcqRel) {
            callback(Err(CallError::AlreadyExecuted));
            return;
        }
        let raw = match self.raw_call() {
            Ok(raw) => raw,
            Err(e) => {
                callback(Err(e));
                return;
            }
        };
        if self.cancelled.load(Ordering::Acquire) {
            raw.cancel();
        }

        let call_id = self.id;
        let converter = Arc::clone(&self.converter);
        debug!(call_id = %call_id, method = %self.template.method(), "Enqueueing call");
        raw.enqueue(Box::new(move |outcome| {
            let result = outcome
                .map_err(CallError::from)
                .and_then(|raw| parse_response(converter.as_ref(), raw));
            if let Err(panic) =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || callback(result)))
            {
                error!(
                    call_id = %call_id,
                    panic_message = %crate::suspend::panic_message(panic.as_ref()),
                    "Call callback panicked"
                );
            }
        }));
    }

    fn is_executed(&self) -> bool {
        self.executed.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let raw = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .raw
            .clone();
        if let Some(raw) = raw {
            raw.cancel();
        }
    }

    fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return true;
        }
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .raw
            .as_ref()
            .is_some_and(|raw| raw.is_cancelled())
    }

    fn clone_call(&self) -> CallHandle {
        Arc::new(HttpCall::new(
            Arc::clone(&self.template),
            self.args.clone(),
            Arc::clone(&self.call_factory),
            Arc::clone(&self.converter),
        ))
    }

    fn request(&self) -> Result<Request, CallError> {
        Ok(self.raw_call()?.request().clone())
    }

    fn timeout(&self) -> TimeoutPolicy {
        self.raw_call()
            .map(|raw| raw.timeout())
            .unwrap_or_default()
    }
}
