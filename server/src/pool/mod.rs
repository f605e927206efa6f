//! Workers pulling connections off a bounded queue.
//!
//! A [`WorkerPool`] runs a fixed number of workers, either as OS threads
//! with their own single-threaded runtime or as tasks on the host runtime.
//! Each worker takes one [`Job`] at a time and runs its handler to the end.
//!
//! Shutting a pool down never leaves a client waiting: queued jobs are
//! answered with a temporary failure and every worker gets a
//! [`WorkerTask::Shutdown`] behind whatever it may still be working on.

mod dispatcher;
mod status;

use std::any::Any;
use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::handler::{self, Context, HandlerKind};

pub use self::dispatcher::Dispatcher;
pub use self::status::{StatusBoard, StatusSlot};

/// Activity of an idle worker
pub const WAITING: &str = "waiting for task";
/// Activity of a worker running a session
pub const STARTING: &str = "starting scan session";
/// Activity of a worker that took its shutdown task
pub const ENDED: &str = "ended";
/// Activity of a worker that panicked
pub const CRASHED: &str = "crashed";

/// An accepted connection waiting for a worker.
///
/// The stream is kept as a std socket so any worker runtime can adopt it.
#[derive(Debug)]
pub struct Job {
    /// The client connection, non-blocking
    pub stream: std::net::TcpStream,
    /// Who connected
    pub peer: SocketAddr,
    /// What the client speaks
    pub kind: HandlerKind,
}

impl Job {
    /// Detach an accepted tokio stream from its runtime
    ///
    /// # Errors
    /// If the socket could not be converted
    pub fn from_tokio(
        stream: tokio::net::TcpStream,
        peer: SocketAddr,
        kind: HandlerKind,
    ) -> io::Result<Self> {
        let stream = stream.into_std()?;
        stream.set_nonblocking(true)?;
        Ok(Self { stream, peer, kind })
    }
}

/// What travels through the queue
#[derive(Debug)]
pub enum WorkerTask {
    /// A connection to handle
    Work(Job),
    /// Stop after this
    Shutdown,
}

/// How workers are run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Backend {
    /// One OS thread with a current-thread runtime per worker
    #[default]
    Threads,
    /// One task per worker on the host runtime
    Tasks,
}

/// `[pool]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    /// How workers are run
    pub backend: Backend,
    /// How many sessions run at the same time
    pub workers: usize,
    /// How many accepted connections may wait for a worker
    pub queue_size: usize,
    /// How long shutdown waits for each worker
    #[serde(with = "humantime_serde")]
    pub join_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            backend: Backend::Threads,
            workers: 4,
            queue_size: 64,
            join_timeout: Duration::from_secs(30),
        }
    }
}

/// Starting or feeding a pool failed
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool is shutting down, the job is handed back
    #[error("the pool no longer accepts work")]
    Rejected(Job),
    /// The gateway is shutting down, no new pool is started
    #[error("the gateway is shutting down")]
    Closed,
    /// A worker thread or its runtime could not be created
    #[error("could not start worker")]
    Spawn(#[source] io::Error),
    /// The tasks backend needs to be started from within a runtime
    #[error(transparent)]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}

struct Shared {
    receiver: Mutex<mpsc::Receiver<WorkerTask>>,
    stay_alive: AtomicBool,
    context: Context,
}

enum WorkerHandle {
    Thread {
        thread: Option<std::thread::JoinHandle<()>>,
        done: Option<oneshot::Receiver<()>>,
    },
    Task(Option<tokio::task::JoinHandle<()>>),
}

struct Worker {
    name: String,
    handle: WorkerHandle,
}

impl Worker {
    fn is_alive(&self) -> bool {
        match &self.handle {
            WorkerHandle::Thread { thread, .. } => {
                thread.as_ref().is_some_and(|thread| !thread.is_finished())
            }
            WorkerHandle::Task(task) => task.as_ref().is_some_and(|task| !task.is_finished()),
        }
    }

    async fn join(&mut self, join_timeout: Duration) {
        match &mut self.handle {
            WorkerHandle::Thread { thread, done } => {
                if let Some(receiver) = done.as_mut() {
                    // The sender is dropped when the thread's loop returns
                    if timeout(join_timeout, receiver).await.is_err() {
                        warn!(worker = %self.name, "Worker did not stop within {join_timeout:?}");
                        return;
                    }
                    *done = None;
                }
                if let Some(thread) = thread.take() {
                    match tokio::task::spawn_blocking(move || thread.join()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(_)) | Err(_) => {
                            error!(worker = %self.name, "Worker thread panicked");
                        }
                    }
                }
            }
            WorkerHandle::Task(task) => {
                let Some(handle) = task.as_mut() else {
                    return;
                };
                match timeout(join_timeout, handle).await {
                    Err(_elapsed) => {
                        warn!(worker = %self.name, "Worker did not stop within {join_timeout:?}");
                    }
                    Ok(res) => {
                        if let Err(e) = res {
                            error!(worker = %self.name, "Worker task failed: {e}");
                        }
                        *task = None;
                    }
                }
            }
        }
    }
}

/// A set of workers sharing one queue, see the module documentation.
pub struct WorkerPool {
    name: String,
    settings: PoolSettings,
    sender: mpsc::Sender<WorkerTask>,
    shared: Arc<Shared>,
    admission: RwLock<()>,
    workers: Mutex<Vec<Worker>>,
    status: StatusBoard,
}

impl WorkerPool {
    /// Start `settings.workers` workers publishing to `status`
    ///
    /// # Errors
    /// If a worker could not be started; the ones already started stop on
    /// their own
    pub fn start(
        name: &str,
        settings: PoolSettings,
        context: Context,
        status: StatusBoard,
    ) -> Result<Self, PoolError> {
        let (sender, receiver) = mpsc::channel(settings.queue_size.max(1));
        let shared = Arc::new(Shared {
            receiver: Mutex::new(receiver),
            stay_alive: AtomicBool::new(true),
            context,
        });

        let mut workers = Vec::with_capacity(settings.workers);
        for index in 0..settings.workers {
            let worker_name = format!("{name}/worker-{index}");
            let slot = status.register(&worker_name);
            let handle = match settings.backend {
                Backend::Threads => spawn_thread(&worker_name, shared.clone(), slot)?,
                Backend::Tasks => {
                    let runtime = tokio::runtime::Handle::try_current()?;
                    WorkerHandle::Task(Some(runtime.spawn(work(shared.clone(), slot))))
                }
            };
            workers.push(Worker {
                name: worker_name,
                handle,
            });
        }
        info!(
            pool = name,
            backend = %settings.backend,
            workers = settings.workers,
            "Worker pool started"
        );

        Ok(Self {
            name: name.to_string(),
            settings,
            sender,
            shared,
            admission: RwLock::new(()),
            workers: Mutex::new(workers),
            status,
        })
    }

    /// The pool's name, the prefix of its worker names
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The settings this pool was started with
    #[must_use]
    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Queue `job`, waiting for room in the queue.
    ///
    /// # Errors
    /// [`PoolError::Rejected`] with the job once the pool is shutting down
    pub async fn submit(&self, job: Job) -> Result<(), PoolError> {
        let _admission = self.admission.read().await;
        if !self.shared.stay_alive.load(Ordering::Acquire) {
            return Err(PoolError::Rejected(job));
        }
        match self.sender.send(WorkerTask::Work(job)).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(WorkerTask::Work(job))) => Err(PoolError::Rejected(job)),
            Err(mpsc::error::SendError(WorkerTask::Shutdown)) => Ok(()),
        }
    }

    /// Turn `job` away with a temporary failure, outside of any worker
    pub async fn refuse(&self, job: Job) {
        refuse(job, &self.shared.context).await;
    }

    /// How many workers are still running
    pub async fn workers_alive(&self) -> usize {
        self.workers
            .lock()
            .await
            .iter()
            .filter(|worker| worker.is_alive())
            .count()
    }

    /// Worker name to activity of this pool's workers
    #[must_use]
    pub fn status(&self) -> std::collections::BTreeMap<String, String> {
        let prefix = format!("{}/", self.name);
        self.status
            .snapshot()
            .into_iter()
            .filter(|(name, _)| name.starts_with(&prefix))
            .collect()
    }

    /// Stop admitting jobs, answer the queued ones, stop and join every
    /// worker.
    ///
    /// Workers finish the session they are in. A worker not stopping within
    /// the join timeout is logged and left alone.
    pub async fn shutdown(&self) {
        // A producer stuck on a full queue holds a read guard until a worker
        // makes room, which may never happen if every worker crashed
        let admission = timeout(self.settings.join_timeout, self.admission.write()).await;
        if admission.is_err() {
            warn!(pool = %self.name, "Producers are stuck on a full queue, closing anyway");
        }
        self.shared.stay_alive.store(false, Ordering::Release);
        drop(admission);
        info!(pool = %self.name, "Shutting down worker pool");

        self.drain().await;

        let mut workers = self.workers.lock().await;
        for _ in 0..workers.len() {
            match timeout(
                self.settings.join_timeout,
                self.sender.send(WorkerTask::Shutdown),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(_closed)) => break,
                Err(_elapsed) => {
                    warn!(pool = %self.name, "Queue stayed full, some workers were not stopped");
                    break;
                }
            }
        }
        for worker in workers.iter_mut() {
            worker.join(self.settings.join_timeout).await;
        }
        drop(workers);

        // Anything that slipped in while the workers were stopping
        self.drain().await;
        info!(pool = %self.name, "Worker pool stopped");
    }

    /// Remove this pool's workers from the status board
    pub async fn forget_status(&self) {
        for worker in self.workers.lock().await.iter() {
            self.status.unregister(&worker.name);
        }
    }

    async fn drain(&self) {
        // A worker waiting in recv holds the lock, but then the queue is empty
        let Ok(mut receiver) = self.shared.receiver.try_lock() else {
            return;
        };
        let mut jobs = Vec::new();
        while let Ok(task) = receiver.try_recv() {
            if let WorkerTask::Work(job) = task {
                jobs.push(job);
            }
        }
        drop(receiver);

        if !jobs.is_empty() {
            info!(pool = %self.name, "Refusing {} queued connections", jobs.len());
        }
        let context = &self.shared.context;
        join_all(jobs.into_iter().map(|job| refuse(job, context))).await;
    }
}

fn spawn_thread(
    name: &str,
    shared: Arc<Shared>,
    slot: StatusSlot,
) -> Result<WorkerHandle, PoolError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(PoolError::Spawn)?;
    let (done, done_receiver) = oneshot::channel();

    let thread = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            runtime.block_on(work(shared, slot));
            drop(done);
        })
        .map_err(PoolError::Spawn)?;

    Ok(WorkerHandle::Thread {
        thread: Some(thread),
        done: Some(done_receiver),
    })
}

/// The loop every worker runs
async fn work(shared: Arc<Shared>, slot: StatusSlot) {
    loop {
        slot.set(WAITING);
        let task = shared.receiver.lock().await.recv().await;
        let job = match task {
            Some(WorkerTask::Work(job)) => job,
            Some(WorkerTask::Shutdown) | None => {
                debug!(worker = slot.name(), "Worker stopping");
                slot.set(ENDED);
                return;
            }
        };

        if !shared.stay_alive.load(Ordering::Acquire) {
            refuse(job, &shared.context).await;
            continue;
        }

        slot.set(STARTING);
        let peer = job.peer;
        let session = AssertUnwindSafe(handler::handle(job, &shared.context)).catch_unwind();
        match session.await {
            Ok(Ok(())) => debug!(worker = slot.name(), %peer, "Session finished"),
            Ok(Err(e)) => warn!(worker = slot.name(), %peer, "Session failed: {e}"),
            Err(panic) => {
                error!(
                    worker = slot.name(),
                    %peer,
                    "Worker crashed: {}",
                    panic_message(panic.as_ref())
                );
                slot.set(CRASHED);
                return;
            }
        }
    }
}

async fn refuse(job: Job, context: &Context) {
    let peer = job.peer;
    if let Err(e) = handler::refuse(job, context).await {
        warn!(%peer, "Could not refuse connection: {e}");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
