//! # jobsteal - Fork-Join Job Scheduler
//!
//! A work-stealing job scheduler for fine-grained, CPU-bound parallel work.
//! Callers create jobs, submit them, and wait on them; jobs may create child
//! jobs, and a parent only counts as complete once all of its descendants
//! have finished.
//!
//! ## Architecture
//!
//! - **Workers**: one per thread, including the thread that starts the system
//!   (worker 0). Each owns a job pool and a work-stealing deque.
//! - **Job pools**: fixed arenas of job records. Allocation never touches the
//!   global allocator and never hands out a slot whose job is still live.
//! - **Deques**: lock-free Chase-Lev deques. The owner pushes and pops at one
//!   end; idle workers steal from the other.
//! - **Counters**: each job tracks its own body plus its unfinished children.
//!   When the count reaches zero the job's continuations are submitted and
//!   its parent is notified.
//! - **Waiting**: a waiting worker keeps executing other jobs instead of
//!   blocking.
//!
//! ## Example
//!
//! ```no_run
//! use jobsteal::JobSystem;
//!
//! let system = JobSystem::new(4)?;
//!
//! let mut values = vec![1.0f32; 100_000];
//! system.parallel_for_slice(&mut values, 256, |chunk| {
//!     for value in chunk {
//!         *value *= 2.0;
//!     }
//! })?;
//!
//! system.stop()?;
//! # Ok::<(), jobsteal::JobError>(())
//! ```

pub mod context;
pub(crate) mod counter;
pub mod deque;
pub mod error;
pub mod job;
pub mod job_system;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod parallel;
pub(crate) mod pool;
pub mod scheduler;
pub(crate) mod worker;

use serde::{Deserialize, Serialize};

/// Strategy for pinning worker threads to CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinningStrategy {
    /// No pinning (standard OS scheduling).
    #[default]
    None,
    /// Linear pinning (worker i -> logical processor i).
    Linear,
}

pub use context::JobContext;
pub use deque::{Steal, WorkStealingDeque};
pub use error::{JobError, Result};
pub use job::{CONTINUATION_CAPACITY, JobBody, JobRef};
pub use job_system::{JobSystem, SchedulerConfig};
#[cfg(feature = "metrics")]
pub use metrics::{Metrics, MetricsSnapshot};
pub use scheduler::{Scheduler, SchedulerState};

#[cfg(test)]
mod tests;
