//! High-level job system interface.
//!
//! A `JobSystem` owns a running scheduler. Starting one binds the calling
//! thread as worker 0 and spawns the remaining workers; stopping it joins
//! them. Everything else (creating, running and waiting on jobs) goes
//! through the scheduler, which the job system dereferences to.

use crate::PinningStrategy;
use crate::error::{JobError, Result};
use crate::scheduler::Scheduler;
use crate::worker::{self, Worker};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

/// Default number of job slots per worker pool.
pub const DEFAULT_POOL_CAPACITY: usize = 4096;
/// Default number of queued jobs per worker deque.
pub const DEFAULT_DEQUE_CAPACITY: usize = 4096;

fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Configuration for starting a job system.
///
/// Missing fields take their defaults when deserialized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker count including the starting thread. Default: available parallelism.
    pub worker_count: usize,
    /// Job slots per worker. Must be a power of two. Default: 4096.
    pub pool_capacity: usize,
    /// Deque slots per worker. Must be a power of two. Default: 4096.
    pub deque_capacity: usize,
    /// How spawned workers are pinned to cores. Worker 0 is never pinned.
    pub pinning: PinningStrategy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            pool_capacity: DEFAULT_POOL_CAPACITY,
            deque_capacity: DEFAULT_DEQUE_CAPACITY,
            pinning: PinningStrategy::None,
        }
    }
}

impl SchedulerConfig {
    /// Default configuration with `worker_count` workers.
    pub fn with_workers(worker_count: usize) -> Self {
        Self {
            worker_count,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(JobError::InvalidConfig(
                "worker_count must be at least 1".into(),
            ));
        }
        if !self.pool_capacity.is_power_of_two() {
            return Err(JobError::InvalidConfig(format!(
                "pool_capacity must be a power of two, got {}",
                self.pool_capacity
            )));
        }
        if !self.deque_capacity.is_power_of_two() {
            return Err(JobError::InvalidConfig(format!(
                "deque_capacity must be a power of two, got {}",
                self.deque_capacity
            )));
        }
        Ok(())
    }
}

/// A running job system.
///
/// The thread that starts it is worker 0, so the handle cannot be sent to
/// another thread. Dropping it stops the workers.
///
/// # Example
///
/// ```
/// use jobsteal::JobSystem;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let system = JobSystem::new(4).unwrap();
/// let hits = Arc::new(AtomicUsize::new(0));
///
/// let counter = hits.clone();
/// let root = system
///     .create_job(move |ctx| {
///         for _ in 0..8 {
///             let counter = counter.clone();
///             ctx.spawn_child(move |_| {
///                 counter.fetch_add(1, Ordering::Relaxed);
///             })
///             .unwrap();
///         }
///     })
///     .unwrap();
///
/// system.run(root).unwrap();
/// system.wait(root);
/// assert_eq!(hits.load(Ordering::Relaxed), 8);
/// system.stop().unwrap();
/// ```
pub struct JobSystem {
    scheduler: Arc<Scheduler>,
    workers: Vec<Worker>,
    stopped: bool,
    _worker_zero: PhantomData<*const ()>,
}

impl JobSystem {
    /// Starts a job system with `worker_count` workers and default capacities.
    pub fn new(worker_count: usize) -> Result<Self> {
        Self::start(SchedulerConfig::with_workers(worker_count))
    }

    /// Starts a job system with one worker per available CPU.
    pub fn with_default_threads() -> Result<Self> {
        Self::start(SchedulerConfig::default())
    }

    /// Starts a job system.
    ///
    /// Returns once every worker has registered, so the first job submitted
    /// can already be stolen.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread is already a worker of a live job system.
    pub fn start(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;

        let scheduler = Arc::new(Scheduler::new(&config));
        scheduler.begin_start();
        worker::bind(&scheduler, 0);
        scheduler.register_worker();

        let mut system = JobSystem {
            scheduler,
            workers: Vec::with_capacity(config.worker_count - 1),
            stopped: false,
            _worker_zero: PhantomData,
        };

        for index in 1..config.worker_count {
            match Worker::spawn(Arc::clone(&system.scheduler), index, config.pinning) {
                Ok(worker) => system.workers.push(worker),
                Err(source) => {
                    if let Err(err) = system.shutdown() {
                        warn!(%err, "cleanup after failed start");
                    }
                    return Err(JobError::Spawn { index, source });
                }
            }
        }

        system.scheduler.await_registration();
        system.scheduler.mark_running();
        info!(
            workers = config.worker_count,
            pool_capacity = config.pool_capacity,
            deque_capacity = config.deque_capacity,
            pinning = ?config.pinning,
            "job system started"
        );
        Ok(system)
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn num_workers(&self) -> usize {
        self.scheduler.worker_count()
    }

    /// Stops the workers and waits for them to exit.
    ///
    /// Jobs still queued are dropped without running. Returns
    /// `WorkerPanicked` if a worker thread died outside a job body.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.scheduler.mark_stopped();

        let mut panicked = 0;
        for worker in self.workers.drain(..) {
            let index = worker.index();
            if worker.join().is_err() {
                warn!(worker = index, "worker thread panicked");
                panicked += 1;
            }
        }
        worker::unbind();

        info!(
            workers = self.scheduler.worker_count(),
            jobs_allocated = self.scheduler.jobs_allocated(),
            panicked_jobs = self.scheduler.panicked_jobs(),
            "job system stopped"
        );

        if panicked > 0 {
            Err(JobError::WorkerPanicked { count: panicked })
        } else {
            Ok(())
        }
    }
}

impl Deref for JobSystem {
    type Target = Scheduler;

    fn deref(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(%err, "error while stopping job system");
        }
    }
}
