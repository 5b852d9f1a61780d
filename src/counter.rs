//! Completion counter for job records.
//!
//! The counter packs the slot generation (high 32 bits) and the number of
//! unfinished units of work (low 32 bits) into one atomic word. A job is
//! complete when its pending count is zero. Pool slots are recycled, so a
//! handle also remembers the generation it was issued for; a handle whose
//! generation no longer matches refers to a job that finished long ago.

use std::sync::atomic::{AtomicU64, Ordering};

const COUNT_MASK: u64 = 0xFFFF_FFFF;
const GENERATION_SHIFT: u32 = 32;

#[inline]
fn generation_of(state: u64) -> u32 {
    (state >> GENERATION_SHIFT) as u32
}

#[inline]
fn pending_of(state: u64) -> u32 {
    (state & COUNT_MASK) as u32
}

/// Generation-tagged countdown of a job's unfinished work.
pub(crate) struct JobCounter {
    state: AtomicU64,
}

impl JobCounter {
    /// Creates a counter for a slot that has never held a job.
    pub(crate) const fn new() -> Self {
        JobCounter {
            state: AtomicU64::new(0),
        }
    }

    /// Starts a new generation with one pending unit (the job's own body).
    ///
    /// Returns the new generation. Release ordering publishes everything the
    /// allocator wrote into the slot before the counter itself.
    pub(crate) fn reset(&self) -> u32 {
        let generation = self.generation().wrapping_add(1);
        self.state.store(
            (u64::from(generation) << GENERATION_SHIFT) | 1,
            Ordering::Release,
        );
        generation
    }

    /// Adds one pending unit for a child of the job issued as `generation`.
    ///
    /// Returns false, leaving the counter untouched, if that job has already
    /// completed or its slot has moved on to a newer generation.
    pub(crate) fn add_pending(&self, generation: u32) -> bool {
        // The increment only has to be ordered against later decrements of the
        // same word, which the read-modify-write chain guarantees.
        self.state
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |state| {
                (generation_of(state) == generation && pending_of(state) > 0).then_some(state + 1)
            })
            .is_ok()
    }

    /// Retires one pending unit. Returns true if this brought the count to zero.
    ///
    /// AcqRel: the thread that observes zero sees every write made by the
    /// threads that retired the other units.
    pub(crate) fn complete_one(&self) -> bool {
        let previous = self.state.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(pending_of(previous) > 0, "job counter underflow");
        pending_of(previous) == 1
    }

    /// True once the job issued as `generation` has completed.
    pub(crate) fn is_complete(&self, generation: u32) -> bool {
        let state = self.state.load(Ordering::Acquire);
        generation_of(state) != generation || pending_of(state) == 0
    }

    /// Current generation of the slot.
    pub(crate) fn generation(&self) -> u32 {
        generation_of(self.state.load(Ordering::Acquire))
    }

    /// Current pending count of the slot's job.
    pub(crate) fn pending(&self) -> u32 {
        pending_of(self.state.load(Ordering::Acquire))
    }
}
