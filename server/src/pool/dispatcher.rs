//! The pool the listeners currently feed, and swapping it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::info;

use super::{Job, PoolError, PoolSettings, StatusBoard, WorkerPool};
use crate::handler::Context;

/// Routes accepted connections to the current [`WorkerPool`].
///
/// [`Dispatcher::reload`] starts a replacement pool, makes it current and
/// then shuts the old one down. Connections arriving meanwhile go to
/// whichever pool is current when they are dispatched.
pub struct Dispatcher {
    current: RwLock<Arc<WorkerPool>>,
    generation: AtomicUsize,
    status: StatusBoard,
    // Serializes swapping the current pool and closing
    swapping: Mutex<()>,
    closed: AtomicBool,
}

impl Dispatcher {
    /// Start the first pool
    ///
    /// # Errors
    /// If the pool could not be started
    pub fn new(settings: PoolSettings, context: Context) -> Result<Self, PoolError> {
        let status = StatusBoard::new();
        let pool = WorkerPool::start(&pool_name(0), settings, context, status.clone())?;
        Ok(Self {
            current: RwLock::new(Arc::new(pool)),
            generation: AtomicUsize::new(0),
            status,
            swapping: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// The pool new connections go to
    pub async fn current(&self) -> Arc<WorkerPool> {
        self.current.read().await.clone()
    }

    /// Hand `job` to the current pool.
    ///
    /// A job rejected by a pool that was replaced in the meantime is offered
    /// to its successor once.
    ///
    /// # Errors
    /// [`PoolError::Rejected`] with the job if no pool takes it
    pub async fn dispatch(&self, job: Job) -> Result<(), PoolError> {
        let pool = self.current().await;
        let job = match pool.submit(job).await {
            Err(PoolError::Rejected(job)) => job,
            res => return res,
        };

        let successor = self.current().await;
        if Arc::ptr_eq(&pool, &successor) {
            return Err(PoolError::Rejected(job));
        }
        successor.submit(job).await
    }

    /// Replace the current pool with one built from `settings`, then shut
    /// the old one down.
    ///
    /// Returns once every worker of the old pool has been joined or timed
    /// out. Jobs still queued in the old pool are refused. A
    /// [`Dispatcher::shutdown`] issued meanwhile does not wait for the old
    /// pool.
    ///
    /// # Errors
    /// If the new pool could not be started, the old one stays current.
    /// [`PoolError::Closed`] after [`Dispatcher::shutdown`]
    pub async fn reload(&self, settings: PoolSettings, context: Context) -> Result<(), PoolError> {
        let old = {
            let _swapping = self.swapping.lock().await;
            if self.closed.load(Ordering::Acquire) {
                return Err(PoolError::Closed);
            }

            let generation = self.generation.load(Ordering::Acquire) + 1;
            let pool = Arc::new(WorkerPool::start(
                &pool_name(generation),
                settings,
                context,
                self.status.clone(),
            )?);
            self.generation.store(generation, Ordering::Release);

            let old = std::mem::replace(&mut *self.current.write().await, pool);
            info!(old = old.name(), new = %pool_name(generation), "Switched worker pool");
            old
        };

        old.shutdown().await;
        old.forget_status().await;
        Ok(())
    }

    /// Worker name to activity of every running pool
    #[must_use]
    pub fn status(&self) -> BTreeMap<String, String> {
        self.status.snapshot()
    }

    /// Shut the current pool down, see [`WorkerPool::shutdown`]. Later
    /// reloads fail with [`PoolError::Closed`].
    ///
    /// A pool being replaced by a running [`Dispatcher::reload`] is stopped
    /// by that reload.
    pub async fn shutdown(&self) {
        let pool = {
            let _swapping = self.swapping.lock().await;
            self.closed.store(true, Ordering::Release);
            self.current().await
        };
        pool.shutdown().await;
    }

    /// Turn `job` away with a temporary failure
    pub async fn refuse(&self, job: Job) {
        self.current().await.refuse(job).await;
    }
}

fn pool_name(generation: usize) -> String {
    format!("pool-{generation}")
}
