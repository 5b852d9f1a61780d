//! Per-worker job pool.
//!
//! Each worker owns a fixed array of job slots and allocates from it by
//! advancing a cursor. Only the owning worker allocates, so there is no
//! contention; slots are handed back by whichever thread finishes the job.
//! Unlike a plain ring, a slot is only reused once its previous job has
//! completely finished, and a full pool is reported rather than overwritten.

use crate::error::{JobError, Result};
use crate::job::{Job, JobBody};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fixed-capacity arena of job records owned by one worker.
pub(crate) struct JobPool {
    slots: Box<[Job]>,
    mask: usize,
    /// Advanced only by the owning worker.
    cursor: AtomicUsize,
    allocated: AtomicUsize,
}

impl JobPool {
    /// Creates a pool with `capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two.
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "job pool capacity must be a power of two, got {capacity}"
        );
        JobPool {
            slots: (0..capacity).map(|_| Job::empty()).collect(),
            mask: capacity - 1,
            cursor: AtomicUsize::new(0),
            allocated: AtomicUsize::new(0),
        }
    }

    /// Allocates a slot for a new job and returns it with its generation.
    ///
    /// Starts at the cursor and skips slots whose jobs are still live. Must
    /// only be called by the worker that owns this pool.
    pub(crate) fn allocate(
        &self,
        body: JobBody,
        parent: Option<NonNull<Job>>,
    ) -> Result<(NonNull<Job>, u32)> {
        let start = self.cursor.load(Ordering::Relaxed);
        for probe in 0..self.slots.len() {
            let position = start.wrapping_add(probe);
            let job = &self.slots[position & self.mask];
            if !job.try_claim() {
                continue;
            }

            self.cursor
                .store(position.wrapping_add(1), Ordering::Relaxed);
            self.allocated.fetch_add(1, Ordering::Relaxed);
            // SAFETY: the slot was just claimed and no handle to it exists yet.
            let generation = unsafe { job.prepare(body, parent) };
            return Ok((NonNull::from(job), generation));
        }

        Err(JobError::PoolExhausted {
            capacity: self.slots.len(),
        })
    }

    /// Total number of successful allocations.
    pub(crate) fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Number of slots currently holding live jobs.
    pub(crate) fn live(&self) -> usize {
        self.slots.iter().filter(|job| job.is_in_use()).count()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }
}
