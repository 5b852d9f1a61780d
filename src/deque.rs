//! Fixed-capacity lock-free work-stealing deque.
//!
//! A Chase-Lev deque over a power-of-two ring of pointers. The owning worker
//! pushes and pops at the bottom; any thread steals from the top. `top` and
//! `bottom` are monotonically increasing logical indices, wrapped into the
//! ring with a mask.
//!
//! Memory ordering, per operation:
//!
//! - `push`: the slot store is followed by a release store of `bottom`, which
//!   pairs with the acquire load of `bottom` in `steal`. A thief that sees the
//!   new `bottom` also sees the slot and everything written to the pointee.
//! - `pop`: `bottom` is decremented before `top` is read, separated by a
//!   sequentially consistent fence so a concurrent `steal` either sees the
//!   decrement or is seen by the owner. For the last item both sides race
//!   through a CAS on `top`; the winner takes the item and the owner always
//!   leaves the deque in the canonical empty state `bottom == top`.
//! - `steal`: acquire `top`, fence, acquire `bottom`, read the slot, then
//!   claim it with a CAS on `top`. A failed CAS means another thread took the
//!   item first and is reported as `Steal::Retry`.
//!
//! Slots are atomic pointers, so a thief reading a slot that the owner is
//! rewriting is a benign race: the thief's CAS fails and the value is
//! discarded.

use crossbeam::utils::CachePadded;
use std::ptr::{self, NonNull};
use std::sync::atomic::{self, AtomicIsize, AtomicPtr, Ordering};

/// Outcome of a steal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Steal<T> {
    /// The deque had nothing to take.
    Empty,
    /// Another thread won the race for the item; try elsewhere.
    Retry,
    /// The item now belongs to the caller.
    Success(T),
}

impl<T> Steal<T> {
    /// Returns the stolen item, if any.
    pub fn success(self) -> Option<T> {
        match self {
            Steal::Success(item) => Some(item),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Steal::Empty)
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, Steal::Retry)
    }
}

/// Single-owner, multi-thief deque of pointers.
///
/// `push` and `pop` must only be called by one thread at a time (the owner).
/// `steal` may be called from any thread, the owner included. The deque
/// never allocates after construction and never owns the pointees.
pub struct WorkStealingDeque<T> {
    top: CachePadded<AtomicIsize>,
    bottom: CachePadded<AtomicIsize>,
    slots: Box<[AtomicPtr<T>]>,
    mask: usize,
}

impl<T> WorkStealingDeque<T> {
    /// Creates an empty deque holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "deque capacity must be a power of two, got {capacity}"
        );
        WorkStealingDeque {
            top: CachePadded::new(AtomicIsize::new(0)),
            bottom: CachePadded::new(AtomicIsize::new(0)),
            slots: (0..capacity)
                .map(|_| AtomicPtr::new(ptr::null_mut()))
                .collect(),
            mask: capacity - 1,
        }
    }

    #[inline]
    fn slot(&self, index: isize) -> &AtomicPtr<T> {
        &self.slots[index as usize & self.mask]
    }

    /// Maximum number of items the deque can hold.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Approximate number of queued items. Only a hint under concurrency.
    pub fn len(&self) -> usize {
        let bottom = self.bottom.load(Ordering::Relaxed);
        let top = self.top.load(Ordering::Relaxed);
        bottom.saturating_sub(top).max(0) as usize
    }

    /// Approximate emptiness check. Only a hint under concurrency.
    pub fn is_empty(&self) -> bool {
        self.top.load(Ordering::Relaxed) >= self.bottom.load(Ordering::Relaxed)
    }

    /// Pushes an item at the bottom. Owner only.
    ///
    /// Returns the item back if the deque is full, instead of overwriting an
    /// item that has not been consumed yet.
    pub fn push(&self, item: NonNull<T>) -> Result<(), NonNull<T>> {
        let bottom = self.bottom.load(Ordering::Relaxed);
        let top = self.top.load(Ordering::Acquire);
        if bottom - top >= self.slots.len() as isize {
            return Err(item);
        }

        self.slot(bottom).store(item.as_ptr(), Ordering::Relaxed);
        self.bottom.store(bottom + 1, Ordering::Release);
        Ok(())
    }

    /// Pops the most recently pushed item. Owner only.
    pub fn pop(&self) -> Option<NonNull<T>> {
        let bottom = self.bottom.load(Ordering::Relaxed) - 1;
        self.bottom.store(bottom, Ordering::Relaxed);
        atomic::fence(Ordering::SeqCst);
        let top = self.top.load(Ordering::Relaxed);

        if bottom < top {
            // Already empty; undo the speculative decrement.
            self.bottom.store(bottom + 1, Ordering::Relaxed);
            return None;
        }

        let item = NonNull::new(self.slot(bottom).load(Ordering::Relaxed));
        if bottom > top {
            // More than one item left; no thief can reach this slot.
            return item;
        }

        // Last item: race any thief for it through `top`.
        let won = self
            .top
            .compare_exchange(top, top + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok();
        self.bottom.store(top + 1, Ordering::Relaxed);
        if won { item } else { None }
    }

    /// Steals the oldest item. Any thread.
    pub fn steal(&self) -> Steal<NonNull<T>> {
        let top = self.top.load(Ordering::Acquire);
        atomic::fence(Ordering::SeqCst);
        let bottom = self.bottom.load(Ordering::Acquire);

        if top >= bottom {
            return Steal::Empty;
        }

        let item = self.slot(top).load(Ordering::Relaxed);
        if self
            .top
            .compare_exchange(top, top + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return Steal::Retry;
        }

        match NonNull::new(item) {
            Some(item) => Steal::Success(item),
            None => Steal::Retry,
        }
    }
}
