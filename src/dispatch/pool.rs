//! Fixed-size async worker pool
//!
//! Workers are tokio tasks pulling jobs from one bounded queue. A job
//! names a registered handler and carries an opaque payload; its reply
//! comes back through a oneshot channel wrapped in a [`TaskTicket`].
//! Handler errors and panics are caught inside the worker and reported
//! through the ticket, so a bad task never takes a worker down.

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Reply of one task: handler output or a failure description
pub type TaskResult = Result<Vec<u8>, String>;

/// Named unit of work executed by pool workers
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Process one payload
    async fn handle(&self, payload: Vec<u8>) -> TaskResult;
}

struct Job {
    function: String,
    payload: Vec<u8>,
    reply: oneshot::Sender<TaskResult>,
}

/// Future resolving to the reply of a submitted task
pub struct TaskTicket {
    receiver: oneshot::Receiver<TaskResult>,
}

impl Future for TaskTicket {
    type Output = TaskResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|reply| reply.unwrap_or_else(|_| Err("worker pool dropped the task".to_string())))
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`WorkerPool`]
pub struct WorkerPoolBuilder {
    workers: usize,
    queue_capacity: usize,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl Default for WorkerPoolBuilder {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            handlers: HashMap::new(),
        }
    }
}

impl WorkerPoolBuilder {
    /// Number of workers (at least one)
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Bounded queue size (at least one)
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Register a handler under `name`
    pub fn register(mut self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Build the pool; workers start with [`WorkerPool::start`]
    pub fn build(self) -> WorkerPool {
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        WorkerPool {
            workers: self.workers,
            sender: Mutex::new(Some(sender)),
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            handlers: Arc::new(self.handlers),
            handles: Mutex::new(Vec::new()),
        }
    }
}

// =============================================================================
// Worker Pool
// =============================================================================

/// Fixed set of workers sharing one job queue
pub struct WorkerPool {
    workers: usize,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    handlers: Arc<HashMap<String, Arc<dyn TaskHandler>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start building a pool
    pub fn builder() -> WorkerPoolBuilder {
        WorkerPoolBuilder::default()
    }

    /// Configured worker count
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Whether workers are running
    pub fn is_running(&self) -> bool {
        !self.handles.lock().is_empty()
    }

    /// Spawn the workers; calling again while running does nothing
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return;
        }
        for id in 0..self.workers {
            let receiver = Arc::clone(&self.receiver);
            let handlers = Arc::clone(&self.handlers);
            handles.push(tokio::spawn(worker_loop(id, receiver, handlers)));
        }
        debug!(workers = self.workers, "Worker pool started");
    }

    /// Queue a task for handler `function`
    ///
    /// Waits for queue space. After shutdown, or for an unknown handler,
    /// the ticket resolves to an error.
    pub async fn submit(&self, function: &str, payload: Vec<u8>) -> TaskTicket {
        let (reply, receiver) = oneshot::channel();
        let sender = self.sender.lock().clone();
        let job = Job {
            function: function.to_string(),
            payload,
            reply,
        };

        match sender {
            Some(sender) => {
                if let Err(mpsc::error::SendError(job)) = sender.send(job).await {
                    let _ = job.reply.send(Err("worker pool is shut down".to_string()));
                }
            }
            None => {
                let _ = job.reply.send(Err("worker pool is shut down".to_string()));
            }
        }
        TaskTicket { receiver }
    }

    /// Wait for every worker to exit
    ///
    /// Workers exit once the queue is closed by [`shutdown`](Self::shutdown)
    /// and drained. Used by a dedicated worker process.
    pub async fn run(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
    }

    /// Close the queue and wait for queued tasks to finish
    pub async fn shutdown(&self) {
        self.sender.lock().take();
        self.run().await;
        debug!("Worker pool stopped");
    }
}

async fn worker_loop(
    id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    handlers: Arc<HashMap<String, Arc<dyn TaskHandler>>>,
) {
    loop {
        let job = { receiver.lock().await.recv().await };
        let Some(job) = job else {
            break;
        };

        let result = match handlers.get(&job.function) {
            None => Err(format!("unknown task function '{}'", job.function)),
            Some(handler) => match AssertUnwindSafe(handler.handle(job.payload)).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    error!(worker = id, function = %job.function, "Task handler panicked");
                    Err(format!("task '{}' panicked", job.function))
                }
            },
        };

        if let Err(e) = &result {
            warn!(worker = id, function = %job.function, error = %e, "Task failed");
        }
        // Submitter may have gone away
        let _ = job.reply.send(result);
    }
    debug!(worker = id, "Worker exiting");
}
