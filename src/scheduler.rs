//! Scheduler core: job creation, submission, the steal loop and fork-join
//! completion.
//!
//! The scheduler owns one registry slot per worker. Each slot holds that
//! worker's job pool and work-stealing deque. Jobs are allocated from the
//! calling worker's pool and pushed onto the calling worker's deque; other
//! workers only ever reach them by stealing.
//!
//! Completion is tracked with counters: a job starts with one pending unit
//! for its own body, gains one per child, and loses one when its body
//! returns and one per finished child. When the count reaches zero the
//! job's continuations are submitted and its parent loses a unit in turn.

use crate::context::JobContext;
use crate::deque::{Steal, WorkStealingDeque};
use crate::error::{JobError, Result};
use crate::job::{Job, JobBody, JobRef};
use crate::job_system::SchedulerConfig;
#[cfg(feature = "metrics")]
use crate::metrics::Metrics;
use crate::pool::JobPool;
use crate::worker;
use crossbeam::utils::Backoff;
use rand::Rng;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicUsize, Ordering};
use std::thread;
use tracing::{debug, error, warn};

static NEXT_SCHEDULER_ID: AtomicU32 = AtomicU32::new(1);

/// Lifecycle of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    /// Workers are registering; nobody steals until all have.
    Starting,
    Running,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SchedulerState::Starting,
            2 => SchedulerState::Running,
            _ => SchedulerState::Stopped,
        }
    }
}

/// Registry entry for one worker.
struct WorkerSlot {
    deque: WorkStealingDeque<Job>,
    pool: JobPool,
}

/// Shared scheduler state, reachable from every worker and every job body.
///
/// Obtained through a running [`JobSystem`](crate::JobSystem) (which
/// dereferences to it) or from [`JobContext::scheduler`] inside a job.
/// Operations that allocate or submit work must be called from one of the
/// scheduler's worker threads; calling them from any other thread panics.
pub struct Scheduler {
    id: u32,
    state: AtomicU8,
    registered: AtomicUsize,
    workers: Box<[WorkerSlot]>,
    panicked_jobs: AtomicUsize,
    #[cfg(feature = "metrics")]
    metrics: Metrics,
}

impl Scheduler {
    pub(crate) fn new(config: &SchedulerConfig) -> Self {
        let workers = (0..config.worker_count)
            .map(|_| WorkerSlot {
                deque: WorkStealingDeque::new(config.deque_capacity),
                pool: JobPool::new(config.pool_capacity),
            })
            .collect();

        Scheduler {
            id: NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed),
            state: AtomicU8::new(SchedulerState::Stopped as u8),
            registered: AtomicUsize::new(0),
            workers,
            panicked_jobs: AtomicUsize::new(0),
            #[cfg(feature = "metrics")]
            metrics: Metrics::new(),
        }
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True until the scheduler is stopped. `Starting` counts as running.
    pub(crate) fn is_running(&self) -> bool {
        self.state() != SchedulerState::Stopped
    }

    /// `Stopped -> Starting`.
    ///
    /// # Panics
    ///
    /// Panics if the scheduler has already been started.
    pub(crate) fn begin_start(&self) {
        let started = self.state.compare_exchange(
            SchedulerState::Stopped as u8,
            SchedulerState::Starting as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        assert!(started.is_ok(), "scheduler {} started twice", self.id);
    }

    /// `Starting -> Running`.
    pub(crate) fn mark_running(&self) {
        // Fails only if a stop raced the start, in which case stay stopped.
        let _ = self.state.compare_exchange(
            SchedulerState::Starting as u8,
            SchedulerState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub(crate) fn mark_stopped(&self) {
        self.state
            .store(SchedulerState::Stopped as u8, Ordering::Release);
    }

    pub(crate) fn register_worker(&self) {
        let registered = self.registered.fetch_add(1, Ordering::AcqRel) + 1;
        assert!(
            registered <= self.workers.len(),
            "registered {registered} workers but the registry holds {}",
            self.workers.len()
        );
    }

    /// Spins until every worker has registered.
    ///
    /// Returns false if the scheduler was stopped first.
    pub(crate) fn await_registration(&self) -> bool {
        let backoff = Backoff::new();
        while self.registered.load(Ordering::Acquire) < self.workers.len() {
            if !self.is_running() {
                return false;
            }
            if backoff.is_completed() {
                thread::yield_now();
            } else {
                backoff.snooze();
            }
        }
        true
    }

    /// Number of workers, including worker 0.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Number of workers that have registered so far.
    pub fn registered_workers(&self) -> usize {
        self.registered.load(Ordering::Acquire)
    }

    /// Index of the calling thread, if it is one of this scheduler's workers.
    pub fn current_worker(&self) -> Option<usize> {
        worker::current_index(self.id)
    }

    fn expect_worker(&self, operation: &str) -> usize {
        match self.current_worker() {
            Some(index) => index,
            None => panic!(
                "cannot {operation} from thread {:?}: it is not a worker of job system {}",
                thread::current().name().unwrap_or("<unnamed>"),
                self.id
            ),
        }
    }

    fn resolve(&self, job: JobRef) -> &Job {
        assert_eq!(
            job.scheduler_id(),
            self.id,
            "job handle belongs to a different scheduler"
        );
        // SAFETY: the handle was issued by this scheduler, whose pools own the
        // slot for as long as `self` is alive.
        unsafe { job.ptr().as_ref() }
    }

    /// Capacity of each worker's job pool.
    pub fn pool_capacity(&self) -> usize {
        self.workers[0].pool.capacity()
    }

    /// Capacity of each worker's deque.
    pub fn deque_capacity(&self) -> usize {
        self.workers[0].deque.capacity()
    }

    /// Total jobs allocated by all workers since start.
    pub fn jobs_allocated(&self) -> usize {
        self.workers.iter().map(|slot| slot.pool.allocated()).sum()
    }

    /// Pool slots currently held by jobs whose finish has not completed.
    pub fn live_jobs(&self) -> usize {
        self.workers.iter().map(|slot| slot.pool.live()).sum()
    }

    /// Number of job bodies that panicked.
    pub fn panicked_jobs(&self) -> usize {
        self.panicked_jobs.load(Ordering::Relaxed)
    }

    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Creates a root job with one pending unit and no parent.
    ///
    /// The job does nothing until it is passed to [`run`](Self::run).
    pub fn create_job<F>(&self, body: F) -> Result<JobRef>
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        self.allocate(Box::new(body), None)
    }

    /// Creates a job whose completion is required for `parent` to complete.
    ///
    /// The parent's pending count is incremented before the child is
    /// returned. The parent must not be able to complete concurrently: call
    /// this from the parent's own body, or before the parent is submitted.
    ///
    /// # Panics
    ///
    /// Panics if `parent` has already completed.
    pub fn create_job_as_child<F>(&self, parent: JobRef, body: F) -> Result<JobRef>
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        let parent_job = self.resolve(parent);
        assert!(
            !parent_job.counter.is_complete(parent.generation()),
            "cannot add a child to a job that has already completed"
        );

        let child = self.allocate(Box::new(body), Some(parent.ptr()))?;
        if !parent_job.counter.add_pending(parent.generation()) {
            // The parent finished between the check and the increment. Hand
            // the unreachable child slot back before reporting the misuse.
            // SAFETY: the child was never published, so nothing else holds it.
            unsafe {
                let child_job = child.ptr().as_ref();
                drop(child_job.take_body());
                child_job.release();
            }
            panic!("cannot add a child to a job that has already completed");
        }
        Ok(child)
    }

    fn allocate(&self, body: JobBody, parent: Option<NonNull<Job>>) -> Result<JobRef> {
        let index = self.expect_worker("create jobs");
        let (job, generation) = self.workers[index].pool.allocate(body, parent)?;
        Ok(JobRef::new(job, generation, self.id))
    }

    /// Registers `continuation` to be submitted once `ancestor` completes.
    ///
    /// Registration must happen before anything that could complete
    /// `ancestor` is submitted. Once the ancestor's continuations have been
    /// released, or its slot has moved on to a newer job, registration
    /// returns `AlreadyComplete` instead of attaching to the wrong list.
    ///
    /// # Panics
    ///
    /// Panics if `continuation` was already submitted or has completed.
    pub fn add_continuation(&self, ancestor: JobRef, continuation: JobRef) -> Result<()> {
        let ancestor_job = self.resolve(ancestor);
        let continuation_job = self.resolve(continuation);
        assert!(
            !continuation_job.is_queued()
                && !continuation_job.counter.is_complete(continuation.generation()),
            "a continuation must be a created job that has not been submitted"
        );

        if ancestor_job.counter.is_complete(ancestor.generation()) {
            return Err(JobError::AlreadyComplete);
        }
        // The list re-checks the generation and its sealed flag atomically
        // with the append, so a recycle after the check above is caught too.
        ancestor_job
            .continuations
            .push(ancestor.generation(), continuation.ptr())
    }

    /// Pushes `job` onto the calling worker's own deque.
    ///
    /// On `QueueFull` the job stays created and may be submitted again.
    ///
    /// # Panics
    ///
    /// Panics if the job has already completed or was already submitted.
    pub fn run(&self, job: JobRef) -> Result<()> {
        let index = self.expect_worker("run jobs");
        let record = self.claim_submission(job);
        let slot = &self.workers[index];
        if slot.deque.push(job.ptr()).is_err() {
            record.unmark_queued();
            return Err(JobError::QueueFull {
                capacity: slot.deque.capacity(),
            });
        }
        Ok(())
    }

    /// Like [`run`](Self::run), but executes the job in place when the local
    /// deque is full, so a forked child can never be stranded.
    pub(crate) fn run_or_execute(&self, job: JobRef) {
        let index = self.expect_worker("run jobs");
        self.claim_submission(job);
        self.push_or_execute(job.ptr(), index);
    }

    fn claim_submission(&self, job: JobRef) -> &Job {
        let record = self.resolve(job);
        assert!(
            !record.counter.is_complete(job.generation()),
            "cannot run a job that has already completed"
        );
        assert!(record.mark_queued(), "job submitted twice");
        record
    }

    fn push_or_execute(&self, job: NonNull<Job>, index: usize) {
        if let Err(job) = self.workers[index].deque.push(job) {
            debug!(worker = index, "local deque full, executing job inline");
            #[cfg(feature = "metrics")]
            self.metrics.inline_executions.fetch_add(1, Ordering::Relaxed);
            self.execute(job, index);
        }
    }

    /// True once `job` and all of its children have completed.
    pub fn is_complete(&self, job: JobRef) -> bool {
        self.resolve(job).counter.is_complete(job.generation())
    }

    /// Pending units of `job`: one for its body if it has not run, plus one
    /// per unfinished child. Zero once complete.
    pub fn pending_count(&self, job: JobRef) -> u32 {
        let record = self.resolve(job);
        if record.counter.generation() == job.generation() {
            record.counter.pending()
        } else {
            0
        }
    }

    /// Executes other jobs until `job` completes.
    ///
    /// The calling worker never sleeps: it pops its own deque or steals, so a
    /// waiting thread keeps contributing throughput.
    pub fn wait(&self, job: JobRef) {
        let index = self.expect_worker("wait");
        let record = self.resolve(job);
        while !record.counter.is_complete(job.generation()) {
            if let Some(next) = self.get_job(index) {
                self.execute(next, index);
            }
        }
    }

    /// Pops locally, or steals once from a random other worker.
    ///
    /// Yields the time slice and returns `None` when both come back empty.
    pub(crate) fn get_job(&self, index: usize) -> Option<NonNull<Job>> {
        if let Some(job) = self.workers[index].deque.pop() {
            #[cfg(feature = "metrics")]
            self.metrics.local_pops.fetch_add(1, Ordering::Relaxed);
            return Some(job);
        }

        let count = self.workers.len();
        if count > 1 {
            let victim = pick_victim(index, count);
            match self.workers[victim].deque.steal() {
                Steal::Success(job) => {
                    #[cfg(feature = "metrics")]
                    self.metrics.steals_success.fetch_add(1, Ordering::Relaxed);
                    return Some(job);
                }
                Steal::Empty => {
                    #[cfg(feature = "metrics")]
                    self.metrics.steals_empty.fetch_add(1, Ordering::Relaxed);
                }
                Steal::Retry => {
                    #[cfg(feature = "metrics")]
                    self.metrics.steals_retry.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        thread::yield_now();
        None
    }

    /// Runs the job's body, drops it, then finishes the job.
    pub(crate) fn execute(&self, job: NonNull<Job>, index: usize) {
        // SAFETY: the caller removed `job` from a deque, or owns it after a
        // failed push, so this thread has exclusive use of the body. The slot
        // stays allocated until `finish` releases it.
        let record = unsafe { job.as_ref() };
        let body = unsafe { record.take_body() };

        if let Some(body) = body {
            let handle = JobRef::new(job, record.counter.generation(), self.id);
            let context = JobContext::new(self, handle, index);
            // Calling the boxed FnOnce consumes it, releasing captured state
            // now rather than when the slot is reused.
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| body(&context))) {
                self.panicked_jobs.fetch_add(1, Ordering::Relaxed);
                error!(
                    worker = index,
                    panic = panic_message(payload.as_ref()),
                    "job body panicked"
                );
            }
        }

        #[cfg(feature = "metrics")]
        self.metrics.jobs_executed.fetch_add(1, Ordering::Relaxed);
        self.finish(job, index);
    }

    /// Retires one pending unit of `job` and climbs the parent chain for as
    /// long as jobs complete.
    fn finish(&self, job: NonNull<Job>, index: usize) {
        let mut next = Some(job);
        while let Some(current) = next {
            // SAFETY: a slot is only released at the end of its own finish
            // walk, and a parent cannot finish while this child's unit is
            // still pending.
            let record = unsafe { current.as_ref() };
            if !record.counter.complete_one() {
                break;
            }

            next = record.parent();
            record
                .continuations
                .drain(|continuation| self.release_continuation(continuation, index));
            record.release();
        }
    }

    fn release_continuation(&self, continuation: NonNull<Job>, index: usize) {
        // SAFETY: a registered continuation is created and not yet submitted,
        // so its slot is live.
        let record = unsafe { continuation.as_ref() };
        if !record.mark_queued() {
            warn!(worker = index, "continuation was already submitted, skipping");
            return;
        }
        #[cfg(feature = "metrics")]
        self.metrics
            .continuations_released
            .fetch_add(1, Ordering::Relaxed);
        self.push_or_execute(continuation, index);
    }
}

/// Uniformly picks a worker other than `index`.
fn pick_victim(index: usize, count: usize) -> usize {
    let pick = rand::rng().random_range(0..count - 1);
    if pick >= index { pick + 1 } else { pick }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
