//! Worker thread implementation.
//!
//! Every worker, including the thread that started the job system (worker 0),
//! is bound to an index in the scheduler's registry through a thread-local.
//! Spawned workers register, wait until every worker has registered, then
//! pull and execute jobs until the scheduler stops.

use crate::PinningStrategy;
use crate::scheduler::Scheduler;
use std::cell::Cell;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct WorkerBinding {
    scheduler: u32,
    index: usize,
}

thread_local! {
    static CURRENT_WORKER: Cell<Option<WorkerBinding>> = const { Cell::new(None) };
}

/// Binds the calling thread to worker `index` of `scheduler`.
///
/// # Panics
///
/// Panics if the thread already serves a scheduler.
pub(crate) fn bind(scheduler: &Scheduler, index: usize) {
    CURRENT_WORKER.with(|current| {
        if let Some(existing) = current.get() {
            panic!(
                "thread is already worker {} of job system {}; stop it before starting another",
                existing.index, existing.scheduler
            );
        }
        current.set(Some(WorkerBinding {
            scheduler: scheduler.id(),
            index,
        }));
    });
}

/// Clears the calling thread's binding.
pub(crate) fn unbind() {
    CURRENT_WORKER.with(|current| current.set(None));
}

/// Index of the calling thread within the scheduler `scheduler_id`, if bound.
pub(crate) fn current_index(scheduler_id: u32) -> Option<usize> {
    CURRENT_WORKER.with(|current| {
        current
            .get()
            .filter(|binding| binding.scheduler == scheduler_id)
            .map(|binding| binding.index)
    })
}

/// A spawned worker thread.
pub(crate) struct Worker {
    index: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns worker `index`.
    ///
    /// The thread registers itself, waits for the registration barrier and
    /// then runs the steal loop until the scheduler stops.
    pub(crate) fn spawn(
        scheduler: Arc<Scheduler>,
        index: usize,
        pinning: PinningStrategy,
    ) -> io::Result<Self> {
        let handle = thread::Builder::new()
            .name(format!("jobsteal-worker-{index}"))
            .spawn(move || {
                if pinning == PinningStrategy::Linear {
                    pin_to_core(index);
                }

                bind(&scheduler, index);
                scheduler.register_worker();
                debug!(worker = index, "worker registered");

                if scheduler.await_registration() {
                    Worker::run_loop(&scheduler, index);
                }

                unbind();
                debug!(worker = index, "worker exiting");
            })?;

        Ok(Worker {
            index,
            handle: Some(handle),
        })
    }

    /// Main execution loop: pop locally, otherwise steal from a random victim.
    fn run_loop(scheduler: &Scheduler, index: usize) {
        // `get_job` yields the time slice itself when it comes back empty.
        while scheduler.is_running() {
            if let Some(job) = scheduler.get_job(index) {
                scheduler.execute(job, index);
            }
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Waits for the worker thread to finish.
    pub(crate) fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

fn pin_to_core(index: usize) {
    if let Some(core_ids) = core_affinity::get_core_ids()
        && let Some(core) = core_ids.get(index)
        && !core_affinity::set_for_current(*core)
    {
        debug!(worker = index, "core pinning rejected by the OS");
    }
}
