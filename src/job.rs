//! Job records and handles.
//!
//! A `Job` is a pool slot describing one unit of work: its body, a
//! back-reference to the job that spawned it, a completion counter and a
//! short list of continuations. Callers never touch records directly; they
//! hold `JobRef` handles and pass them back to the scheduler.

use crate::context::JobContext;
use crate::counter::JobCounter;
use crate::error::{JobError, Result};
use crossbeam::utils::Backoff;
use std::cell::UnsafeCell;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, Ordering};

/// Maximum number of continuations one job can release.
pub const CONTINUATION_CAPACITY: usize = 6;

/// The work a job performs, invoked once with the job's context.
pub type JobBody = Box<dyn FnOnce(&JobContext<'_>) + Send + 'static>;

/// Handle to a job owned by a scheduler's pools.
///
/// Handles are plain values: copying one does not extend the job's lifetime.
/// Once the job completes its slot may be recycled; the handle keeps the
/// generation it was issued for, so it keeps reporting the old job as
/// complete instead of observing the slot's new occupant.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct JobRef {
    job: NonNull<Job>,
    generation: u32,
    scheduler: u32,
}

// SAFETY: a JobRef is an identifier. It is only dereferenced by the scheduler
// that issued it (checked through `scheduler`), which owns the slot memory.
unsafe impl Send for JobRef {}
unsafe impl Sync for JobRef {}

impl JobRef {
    pub(crate) fn new(job: NonNull<Job>, generation: u32, scheduler: u32) -> Self {
        JobRef {
            job,
            generation,
            scheduler,
        }
    }

    pub(crate) fn ptr(self) -> NonNull<Job> {
        self.job
    }

    pub(crate) fn scheduler_id(self) -> u32 {
        self.scheduler
    }

    /// Generation of the pool slot this handle was issued for.
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRef")
            .field("slot", &self.job.as_ptr())
            .field("generation", &self.generation)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

const COUNT_MASK: u64 = 0x7FFF_FFFF;
const SEALED: u64 = 0x8000_0000;
const GENERATION_SHIFT: u32 = 32;

/// Fixed-capacity list of jobs to submit once the owning job completes.
///
/// `state` packs the generation of the job the list belongs to (high 32
/// bits), a sealed flag (bit 31) and the number of reserved slots. Appends
/// reserve a slot with one read-modify-write that checks generation and seal
/// together, so a registration can never land in a drained list or in the
/// list of a slot's next occupant.
pub(crate) struct ContinuationList {
    state: AtomicU64,
    slots: [AtomicPtr<Job>; CONTINUATION_CAPACITY],
}

impl ContinuationList {
    fn new() -> Self {
        ContinuationList {
            state: AtomicU64::new(0),
            slots: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
        }
    }

    /// Empties the list and opens it for the job issued as `generation`.
    fn reset(&self, generation: u32) {
        for slot in &self.slots {
            slot.store(ptr::null_mut(), Ordering::Relaxed);
        }
        self.state.store(
            u64::from(generation) << GENERATION_SHIFT,
            Ordering::Release,
        );
    }

    /// Appends a continuation for the job issued as `generation`. Safe to call
    /// from several threads at once.
    pub(crate) fn push(&self, generation: u32, continuation: NonNull<Job>) -> Result<()> {
        let reserved = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                let open = (state >> GENERATION_SHIFT) as u32 == generation && state & SEALED == 0;
                (open && ((state & COUNT_MASK) as usize) < CONTINUATION_CAPACITY)
                    .then_some(state + 1)
            });

        match reserved {
            Ok(state) => {
                let index = (state & COUNT_MASK) as usize;
                self.slots[index].store(continuation.as_ptr(), Ordering::Release);
                Ok(())
            }
            Err(state)
                if (state >> GENERATION_SHIFT) as u32 != generation || state & SEALED != 0 =>
            {
                Err(JobError::AlreadyComplete)
            }
            Err(_) => Err(JobError::ContinuationsFull {
                capacity: CONTINUATION_CAPACITY,
            }),
        }
    }

    /// Seals the list and releases every registered continuation, in
    /// registration order. Later appends fail; a second drain releases nothing.
    pub(crate) fn drain(&self, mut release: impl FnMut(NonNull<Job>)) {
        let state = self.state.fetch_or(SEALED, Ordering::AcqRel);
        if state & SEALED != 0 {
            return;
        }

        let len = (state & COUNT_MASK) as usize;
        for slot in &self.slots[..len] {
            // A reserved slot is filled right after its reservation.
            let backoff = Backoff::new();
            loop {
                if let Some(job) = NonNull::new(slot.swap(ptr::null_mut(), Ordering::Acquire)) {
                    release(job);
                    break;
                }
                backoff.snooze();
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        (self.state.load(Ordering::Acquire) & COUNT_MASK) as usize
    }
}

/// One pool slot.
pub(crate) struct Job {
    body: UnsafeCell<Option<JobBody>>,
    parent: AtomicPtr<Job>,
    pub(crate) counter: JobCounter,
    /// Set by `run`, cleared when the slot is reallocated.
    queued: AtomicBool,
    /// Set while the slot belongs to a job whose finish walk has not ended.
    in_use: AtomicBool,
    pub(crate) continuations: ContinuationList,
}

// SAFETY: `body` is the only non-atomic field. It is written by the owning
// pool between `try_claim` and publication, and taken exactly once by the
// thread that dequeued the job. The deque's release/acquire pair orders the
// two accesses, and `in_use` orders the take before the next reallocation.
unsafe impl Sync for Job {}

impl Job {
    pub(crate) fn empty() -> Self {
        Job {
            body: UnsafeCell::new(None),
            parent: AtomicPtr::new(ptr::null_mut()),
            counter: JobCounter::new(),
            queued: AtomicBool::new(false),
            in_use: AtomicBool::new(false),
            continuations: ContinuationList::new(),
        }
    }

    /// Claims a free slot for the owning pool.
    pub(crate) fn try_claim(&self) -> bool {
        self.in_use
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Fills a freshly claimed slot and returns the new generation.
    ///
    /// # Safety
    ///
    /// The caller must have claimed the slot with `try_claim` and not yet
    /// published any handle to it.
    pub(crate) unsafe fn prepare(&self, body: JobBody, parent: Option<NonNull<Job>>) -> u32 {
        unsafe {
            *self.body.get() = Some(body);
        }
        self.parent.store(
            parent.map_or(ptr::null_mut(), NonNull::as_ptr),
            Ordering::Relaxed,
        );
        self.queued.store(false, Ordering::Relaxed);
        let generation = self.counter.reset();
        self.continuations.reset(generation);
        generation
    }

    /// Takes the body out of the slot so it runs, and drops, exactly once.
    ///
    /// # Safety
    ///
    /// Only the thread that removed this job from a deque (or is executing
    /// it inline after creating it) may call this.
    pub(crate) unsafe fn take_body(&self) -> Option<JobBody> {
        unsafe { (*self.body.get()).take() }
    }

    pub(crate) fn parent(&self) -> Option<NonNull<Job>> {
        NonNull::new(self.parent.load(Ordering::Acquire))
    }

    /// Marks the job as submitted. Returns false if it already was.
    pub(crate) fn mark_queued(&self) -> bool {
        !self.queued.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn unmark_queued(&self) {
        self.queued.store(false, Ordering::Release);
    }

    pub(crate) fn is_queued(&self) -> bool {
        self.queued.load(Ordering::Acquire)
    }

    /// Returns the slot to its pool. Nothing may touch the job afterwards.
    pub(crate) fn release(&self) {
        self.in_use.store(false, Ordering::Release);
    }

    pub(crate) fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }
}
