use super::{CallbackExecutor, Task};
use crate::config::EngineConfig;
use may::sync::mpsc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// Counters for a [`WorkerExecutor`]
#[derive(Debug)]
pub struct ExecutorMetrics {
    /// Total tasks submitted
    pub submitted_count: AtomicU64,
    /// Total tasks finished, panicked ones included
    pub completed_count: AtomicU64,
    /// Tasks that panicked
    pub panic_count: AtomicU64,
    /// Tasks run on the submitting thread because the worker was gone
    pub inline_count: AtomicU64,
    /// Current queue depth (approximate)
    pub queue_depth: AtomicUsize,
}

impl ExecutorMetrics {
    pub fn new() -> Self {
        Self {
            submitted_count: AtomicU64::new(0),
            completed_count: AtomicU64::new(0),
            panic_count: AtomicU64::new(0),
            inline_count: AtomicU64::new(0),
            queue_depth: AtomicUsize::new(0),
        }
    }

    fn record_submit(&self) {
        self.submitted_count.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    fn record_completion(&self) {
        self.completed_count.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }

    fn record_panic(&self) {
        self.panic_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_inline(&self) {
        self.inline_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_submitted_count(&self) -> u64 {
        self.submitted_count.load(Ordering::Relaxed)
    }

    pub fn get_completed_count(&self) -> u64 {
        self.completed_count.load(Ordering::Relaxed)
    }

    pub fn get_panic_count(&self) -> u64 {
        self.panic_count.load(Ordering::Relaxed)
    }

    pub fn get_inline_count(&self) -> u64 {
        self.inline_count.load(Ordering::Relaxed)
    }

    pub fn get_queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }
}

impl Default for ExecutorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn run_guarded(name: &str, task: Task, metrics: &ExecutorMetrics) {
    if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
        metrics.record_panic();
        error!(
            executor = %name,
            panic_message = %crate::suspend::panic_message(panic.as_ref()),
            "Callback task panicked"
        );
    }
}

/// Single coroutine draining an unbounded, ordered task queue.
pub struct WorkerExecutor {
    name: String,
    sender: Mutex<mpsc::Sender<Task>>,
    metrics: Arc<ExecutorMetrics>,
}

impl WorkerExecutor {
    /// Spawn the worker coroutine.
    ///
    /// # Safety
    ///
    /// Spawns through `may::coroutine::Builder::spawn()`, which is unsafe in the `may`
    /// runtime. Callbacks run on the coroutine must not block on thread-local state
    /// the coroutine scheduler does not know about.
    pub unsafe fn new(name: impl Into<String>, stack_size: usize) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Task>();
        let metrics = Arc::new(ExecutorMetrics::new());

        info!(executor = %name, stack_size = stack_size, "Creating callback executor");

        let worker_name = name.clone();
        let worker_metrics = Arc::clone(&metrics);
        let spawn_result = may::coroutine::Builder::new()
            .name(name.clone())
            .stack_size(stack_size)
            .spawn(move || {
                debug!(executor = %worker_name, "Callback worker started");
                while let Ok(task) = rx.recv() {
                    run_guarded(&worker_name, task, &worker_metrics);
                    worker_metrics.record_completion();
                }
                debug!(executor = %worker_name, "Callback worker exiting");
            });

        if let Err(e) = spawn_result {
            error!(executor = %name, error = %e, "Failed to spawn callback worker");
        }

        Self {
            name,
            sender: Mutex::new(tx),
            metrics,
        }
    }

    /// Spawn using the stack size from `config`.
    ///
    /// # Safety
    ///
    /// See [`WorkerExecutor::new`].
    pub unsafe fn from_config(name: impl Into<String>, config: &EngineConfig) -> Self {
        Self::new(name, config.callback_stack_size)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<ExecutorMetrics> {
        &self.metrics
    }
}

impl CallbackExecutor for WorkerExecutor {
    fn execute(&self, task: Task) {
        self.metrics.record_submit();
        let sent = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(task);
        if let Err(unsent) = sent {
            let task = unsent.0;
            // Worker is gone; the callback still has to run exactly once.
            warn!(executor = %self.name, "Callback worker unavailable, running task inline");
            self.metrics.record_inline();
            run_guarded(&self.name, task, &self.metrics);
            self.metrics.record_completion();
        }
    }
}

impl std::fmt::Debug for WorkerExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerExecutor")
            .field("name", &self.name)
            .field("metrics", &self.metrics)
            .finish()
    }
}
