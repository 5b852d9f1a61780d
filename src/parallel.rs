//! Recursive range splitting on top of the scheduler.
//!
//! A parallel-for root job halves its range into two child jobs until a
//! range is no longer than the splitter, then hands that range to the leaf
//! body. Children are forked onto the running worker's deque, so idle
//! workers pick up the larger, older halves by stealing.

use crate::context::JobContext;
use crate::error::Result;
use crate::job::JobRef;
use crate::scheduler::Scheduler;
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

/// Raw view of a slice that several jobs write through at once.
struct UnsafeSlice<T> {
    ptr: *mut T,
    len: usize,
}

unsafe impl<T: Send> Send for UnsafeSlice<T> {}
unsafe impl<T: Send> Sync for UnsafeSlice<T> {}

impl<T> UnsafeSlice<T> {
    fn new(slice: &mut [T]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    /// # Safety
    ///
    /// No other live reference may overlap `range`, and the underlying slice
    /// must outlive `'a`.
    unsafe fn range_mut<'a>(&self, range: Range<usize>) -> &'a mut [T] {
        debug_assert!(range.start <= range.end && range.end <= self.len);
        unsafe { std::slice::from_raw_parts_mut(self.ptr.add(range.start), range.len()) }
    }
}

// Manual impl to avoid T: Clone/Copy bound
impl<T> Copy for UnsafeSlice<T> {}
impl<T> Clone for UnsafeSlice<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl Scheduler {
    /// Creates an unsubmitted root job that calls `body` on disjoint ranges
    /// covering `0..count`, each at most `splitter` long.
    ///
    /// A range longer than `splitter` is split at `len / 2`, the left half
    /// taking the smaller share. `count == 0` runs no leaf.
    ///
    /// # Panics
    ///
    /// Panics if `splitter` is zero.
    pub fn parallel_for<F>(&self, count: usize, splitter: usize, body: F) -> Result<JobRef>
    where
        F: Fn(Range<usize>) + Send + Sync + 'static,
    {
        assert!(splitter > 0, "parallel_for splitter must be at least 1");
        let body = Arc::new(body);
        self.create_job(move |ctx| split_range(ctx, 0..count, splitter, &body))
    }

    /// Runs `body` over disjoint chunks of `data` in parallel and returns
    /// once every chunk has been processed.
    ///
    /// # Panics
    ///
    /// Panics if `splitter` is zero, or if called from a thread that is not
    /// one of this scheduler's workers.
    pub fn parallel_for_slice<T, F>(&self, data: &mut [T], splitter: usize, body: F) -> Result<()>
    where
        T: Send,
        F: Fn(&mut [T]) + Sync,
    {
        assert!(splitter > 0, "parallel_for splitter must be at least 1");
        let slice = UnsafeSlice::new(data);
        let chunk = move |range: Range<usize>| {
            // SAFETY: split_range hands every index to exactly one leaf.
            body(unsafe { slice.range_mut(range) })
        };
        let chunk: &(dyn Fn(Range<usize>) + Sync) = &chunk;
        // SAFETY: the root is waited on before returning, and bodies run under
        // catch_unwind, so no job can reach `chunk` or `data` after this frame.
        let chunk: &'static (dyn Fn(Range<usize>) + Sync) = unsafe { std::mem::transmute(chunk) };

        let root = self.parallel_for(slice.len(), splitter, chunk)?;
        self.run_or_execute(root);
        self.wait(root);
        Ok(())
    }
}

fn split_range<F>(ctx: &JobContext<'_>, range: Range<usize>, splitter: usize, body: &Arc<F>)
where
    F: Fn(Range<usize>) + Send + Sync + 'static,
{
    if range.len() <= splitter {
        if !range.is_empty() {
            body(range);
        }
        return;
    }

    let mid = range.start + range.len() / 2;
    for half in [range.start..mid, mid..range.end] {
        let child_body = Arc::clone(body);
        let child_range = half.clone();
        let spawned = ctx.spawn_child(move |ctx| split_range(ctx, child_range, splitter, &child_body));
        if let Err(err) = spawned {
            debug!(%err, start = half.start, end = half.end, "splitting range inline");
            split_range(ctx, half, splitter, body);
        }
    }
}
