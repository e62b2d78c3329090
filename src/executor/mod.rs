//! Bounded worker pool shared by interpreter runners.
//!
//! The [`ExecutionManager`] is an explicit handle, created by the owner of
//! the protocol runs and passed to every [`InterpRunner`]. It owns a tokio
//! runtime whose blocking pool runs submitted tasks, and whose timer wheel
//! backs [`ExecutionManager::schedule`].
//!
//! Every task, scheduled callbacks included, holds one of `max_threads`
//! permits while it runs, and the blocking pool has exactly `max_threads`
//! threads. `min_threads` sizes the async workers that drive timers and
//! hand permits to queued work.
//!
//! # Example
//!
//! ```rust
//! use protocol_sm::executor::{ExecutionManager, ExecutorConfig};
//! use std::sync::mpsc;
//!
//! let manager = ExecutionManager::new(ExecutorConfig::minimal()).unwrap();
//! manager.start().unwrap();
//!
//! let (tx, rx) = mpsc::channel();
//! manager.submit(move || tx.send(42).unwrap()).unwrap();
//! assert_eq!(rx.recv().unwrap(), 42);
//!
//! manager.stop();
//! ```

pub mod config;
pub mod error;
pub mod runner;

pub use config::{ExecutorConfig, ExecutorConfigBuilder};
pub use error::ExecutorError;
pub use runner::{ErrorHandler, InterpRunner};

use crate::interp::TimerHandle;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

struct Pool {
    runtime: Runtime,
    permits: Arc<Semaphore>,
    max_threads: usize,
}

/// Owner of the worker pool.
pub struct ExecutionManager {
    config: RwLock<ExecutorConfig>,
    pool: Mutex<Option<Pool>>,
}

impl ExecutionManager {
    pub fn new(config: ExecutorConfig) -> Result<Self, ExecutorError> {
        config.validate()?;
        Ok(Self {
            config: RwLock::new(config),
            pool: Mutex::new(None),
        })
    }

    /// Replace the configuration. Only allowed while stopped.
    pub fn set_config(&self, config: ExecutorConfig) -> Result<(), ExecutorError> {
        config.validate()?;
        let pool = self.pool.lock();
        if pool.is_some() {
            return Err(ExecutorError::AlreadyRunning);
        }
        *self.config.write() = config;
        Ok(())
    }

    pub fn config(&self) -> ExecutorConfig {
        self.config.read().clone()
    }

    /// How long runners keep their worker after draining their queue.
    pub fn runner_idle_time(&self) -> Duration {
        self.config.read().runner_idle_time
    }

    pub fn start(&self) -> Result<(), ExecutorError> {
        let mut pool = self.pool.lock();
        if pool.is_some() {
            return Err(ExecutorError::AlreadyRunning);
        }
        let config = self.config.read().clone();

        // Async workers only run timers and permit waits; submitted tasks
        // run on the blocking pool, bounded by `max_threads`.
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.min_threads)
            .max_blocking_threads(config.max_threads)
            .thread_keep_alive(config.keep_alive)
            .thread_name("psm-worker")
            .enable_time()
            .build()
            .map_err(|e| ExecutorError::RuntimeBuild(e.to_string()))?;

        tracing::info!(
            min_threads = config.min_threads,
            max_threads = config.max_threads,
            keep_alive_ms = config.keep_alive.as_millis() as u64,
            runner_idle_ms = config.runner_idle_time.as_millis() as u64,
            "Execution manager started"
        );

        *pool = Some(Pool {
            runtime,
            permits: Arc::new(Semaphore::new(config.max_threads)),
            max_threads: config.max_threads,
        });
        Ok(())
    }

    /// Shut the pool down without waiting for in-flight tasks. Safe to call
    /// when not started.
    pub fn stop(&self) {
        let Some(pool) = self.pool.lock().take() else {
            return;
        };
        pool.permits.close();
        pool.runtime.shutdown_background();
        tracing::info!("Execution manager stopped");
    }

    pub fn is_running(&self) -> bool {
        self.pool.lock().is_some()
    }

    /// Number of submitted tasks currently holding a worker.
    pub fn in_flight(&self) -> usize {
        self.pool
            .lock()
            .as_ref()
            .map_or(0, |p| p.max_threads - p.permits.available_permits())
    }

    /// Run `task` on a worker. Blocks the caller while `max_threads` tasks
    /// are already in flight.
    ///
    /// Must not be called from inside an async task, nor from a task already
    /// running on this manager; use [`execute`](Self::execute) there.
    pub fn submit<F>(&self, task: F) -> Result<(), ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        let (handle, permits) = self.pool_handle()?;
        let permit = futures::executor::block_on(permits.acquire_owned())
            .map_err(|_| ExecutorError::NotRunning)?;
        let _guard = handle.enter();
        run_with_permit(permit, task);
        Ok(())
    }

    /// Queue `task` for the next free worker without blocking the caller.
    ///
    /// Used for work posted from inside the pool, where waiting on a permit
    /// would hold a worker that the permit's owner needs.
    pub fn execute<F>(&self, task: F) -> Result<(), ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        let (handle, permits) = self.pool_handle()?;
        handle.spawn(async move {
            let Ok(permit) = permits.acquire_owned().await else {
                return;
            };
            run_with_permit(permit, task);
        });
        Ok(())
    }

    /// Run `f` on a worker after `after` has elapsed, unless the returned
    /// handle is cancelled first. The callback counts against `max_threads`
    /// like any submitted task.
    pub fn schedule<F>(&self, after: Duration, f: F) -> Result<TimerHandle, ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        let (handle, permits) = self.pool_handle()?;
        let timer = handle.spawn(async move {
            tokio::time::sleep(after).await;
            let Ok(permit) = permits.acquire_owned().await else {
                return;
            };
            run_with_permit(permit, f);
        });
        Ok(TimerHandle::new(move || timer.abort()))
    }

    fn pool_handle(&self) -> Result<(Handle, Arc<Semaphore>), ExecutorError> {
        let pool = self.pool.lock();
        let pool = pool.as_ref().ok_or(ExecutorError::NotRunning)?;
        Ok((pool.runtime.handle().clone(), Arc::clone(&pool.permits)))
    }
}

// Blocking threads only ever run permit holders, and there are as many
// blocking threads as permits, so a permit never waits for a thread.
fn run_with_permit<F>(permit: OwnedSemaphorePermit, task: F)
where
    F: FnOnce() + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        task();
    });
}

impl Drop for ExecutionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ExecutionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionManager")
            .field("config", &*self.config.read())
            .field("running", &self.is_running())
            .finish()
    }
}
