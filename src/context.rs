//! Context handed to every job body.

use crate::error::Result;
use crate::job::JobRef;
use crate::scheduler::Scheduler;

/// What a running job can see of the job system.
///
/// Bodies receive the context by reference; it gives them their own handle,
/// the scheduler that runs them, and helpers for forking children.
pub struct JobContext<'a> {
    scheduler: &'a Scheduler,
    job: JobRef,
    worker: usize,
}

impl<'a> JobContext<'a> {
    pub(crate) fn new(scheduler: &'a Scheduler, job: JobRef, worker: usize) -> Self {
        JobContext {
            scheduler,
            job,
            worker,
        }
    }

    /// Handle of the job whose body is running.
    pub fn job(&self) -> JobRef {
        self.job
    }

    pub fn scheduler(&self) -> &'a Scheduler {
        self.scheduler
    }

    /// Index of the worker executing the body.
    pub fn worker_index(&self) -> usize {
        self.worker
    }

    /// Creates a child of the running job without submitting it.
    pub fn create_child<F>(&self, work: F) -> Result<JobRef>
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        self.scheduler.create_job_as_child(self.job, work)
    }

    /// Creates a child of the running job and submits it.
    ///
    /// If the local deque is full the child runs inline before this returns.
    pub fn spawn_child<F>(&self, work: F) -> Result<JobRef>
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        let child = self.create_child(work)?;
        self.scheduler.run_or_execute(child);
        Ok(child)
    }

    /// Creates a detached root job. The running job does not wait for it.
    pub fn create_job<F>(&self, work: F) -> Result<JobRef>
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        self.scheduler.create_job(work)
    }

    pub fn run(&self, job: JobRef) -> Result<()> {
        self.scheduler.run(job)
    }

    /// Helps execute other jobs until `job` completes.
    pub fn wait(&self, job: JobRef) {
        self.scheduler.wait(job)
    }

    pub fn add_continuation(&self, ancestor: JobRef, continuation: JobRef) -> Result<()> {
        self.scheduler.add_continuation(ancestor, continuation)
    }
}
