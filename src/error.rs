//! Error types for the job system.
//!
//! Capacity problems are reported as values so callers can back off or
//! resize. Broken caller contracts (stale handles, double submission, a
//! thread that is not a worker) panic instead.

use thiserror::Error;

/// Errors returned by job system operations.
#[derive(Error, Debug)]
pub enum JobError {
    /// The configuration cannot be used to start a job system.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Every slot in the calling worker's job pool holds a live job.
    #[error("job pool exhausted: all {capacity} slots hold unfinished jobs")]
    PoolExhausted { capacity: usize },

    /// The calling worker's deque already holds `capacity` queued jobs.
    #[error("work queue full: {capacity} jobs already queued on this worker")]
    QueueFull { capacity: usize },

    /// The ancestor's continuation list has no free slot.
    #[error("continuation list full: at most {capacity} continuations per job")]
    ContinuationsFull { capacity: usize },

    /// The ancestor had already completed, so a continuation would never run.
    #[error("job already completed")]
    AlreadyComplete,

    /// The operating system refused to spawn a worker thread.
    #[error("failed to spawn worker {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    /// One or more worker threads panicked outside of a job body.
    #[error("{count} worker thread(s) panicked")]
    WorkerPanicked { count: usize },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, JobError>;
