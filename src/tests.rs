//! Scenario tests for the fork-join scheduler.

use crate::{JobContext, JobSystem, SchedulerConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[test]
fn test_basic_job_execution() {
    let system = JobSystem::new(2).unwrap();
    let value = Arc::new(AtomicUsize::new(0));
    let value_clone = value.clone();

    let job = system
        .create_job(move |_| {
            value_clone.store(42, Ordering::SeqCst);
        })
        .unwrap();
    assert!(!system.is_complete(job));

    system.run(job).unwrap();
    system.wait(job);
    assert!(system.is_complete(job));
    assert_eq!(value.load(Ordering::SeqCst), 42);
    system.stop().expect("stop failed");
}

#[test]
fn test_children_complete_before_parent() {
    const CHILDREN: usize = 1000;

    for workers in [1, 2, 4, 8] {
        let system = JobSystem::new(workers).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let root_hits = hits.clone();
        let root = system
            .create_job(move |ctx| {
                for _ in 0..CHILDREN {
                    let hits = root_hits.clone();
                    ctx.spawn_child(move |_| {
                        hits.fetch_add(1, Ordering::Relaxed);
                    })
                    .unwrap();
                }
            })
            .unwrap();

        system.run(root).unwrap();
        system.wait(root);
        assert_eq!(
            hits.load(Ordering::Relaxed),
            CHILDREN,
            "{workers} workers"
        );
        system.stop().unwrap();
    }
}

#[test]
fn test_wait_covers_grandchildren() {
    let system = JobSystem::new(4).unwrap();
    let finished = Arc::new(AtomicUsize::new(0));

    let root_finished = finished.clone();
    let root = system
        .create_job(move |ctx| {
            for _ in 0..4 {
                let finished = root_finished.clone();
                ctx.spawn_child(move |ctx| {
                    for _ in 0..4 {
                        let finished = finished.clone();
                        ctx.spawn_child(move |_| {
                            thread::sleep(Duration::from_millis(2));
                            finished.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                    }
                })
                .unwrap();
            }
        })
        .unwrap();

    system.run(root).unwrap();
    system.wait(root);
    assert_eq!(finished.load(Ordering::SeqCst), 16);
}

#[test]
fn test_child_created_before_submission_keeps_parent_pending() {
    let system = JobSystem::new(2).unwrap();
    let order = Arc::new(AtomicUsize::new(0));

    let root = system.create_job(|_| {}).unwrap();
    let child_order = order.clone();
    let child = system
        .create_job_as_child(root, move |_| {
            thread::sleep(Duration::from_millis(20));
            child_order.store(1, Ordering::SeqCst);
        })
        .unwrap();
    assert_eq!(system.pending_count(root), 2);
    assert_eq!(system.pending_count(child), 1);

    system.run(root).unwrap();
    system.run(child).unwrap();
    system.wait(root);
    assert_eq!(order.load(Ordering::SeqCst), 1);
    assert!(system.is_complete(child));
    assert_eq!(system.pending_count(root), 0);
}

#[test]
fn test_nested_wait_inside_job() {
    let system = JobSystem::new(4).unwrap();
    let total = Arc::new(AtomicUsize::new(0));

    let root_total = total.clone();
    let root = system
        .create_job(move |ctx| {
            let inner_total = root_total.clone();
            let inner = ctx
                .create_job(move |ctx| {
                    for value in 1..=10 {
                        let total = inner_total.clone();
                        ctx.spawn_child(move |_| {
                            total.fetch_add(value, Ordering::SeqCst);
                        })
                        .unwrap();
                    }
                })
                .unwrap();
            ctx.run(inner).unwrap();
            ctx.wait(inner);
            // The detached job and its children are done before we read.
            assert_eq!(root_total.load(Ordering::SeqCst), 55);
            root_total.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    system.run(root).unwrap();
    system.wait(root);
    assert_eq!(total.load(Ordering::SeqCst), 56);
    assert_eq!(system.panicked_jobs(), 0);
}

#[test]
fn test_continuation_runs_after_ancestor() {
    let system = JobSystem::new(4).unwrap();
    let children_done = Arc::new(AtomicUsize::new(0));
    let observed = Arc::new(AtomicUsize::new(usize::MAX));
    let runs = Arc::new(AtomicUsize::new(0));

    let ancestor_done = children_done.clone();
    let ancestor = system
        .create_job(move |ctx| {
            for _ in 0..8 {
                let done = ancestor_done.clone();
                ctx.spawn_child(move |_| {
                    thread::sleep(Duration::from_millis(1));
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            }
        })
        .unwrap();

    let seen = observed.clone();
    let done = children_done.clone();
    let continuation_runs = runs.clone();
    let continuation = system
        .create_job(move |ctx| {
            assert!(ctx.scheduler().is_complete(ancestor));
            seen.store(done.load(Ordering::SeqCst), Ordering::SeqCst);
            continuation_runs.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    system.add_continuation(ancestor, continuation).unwrap();
    system.run(ancestor).unwrap();
    system.wait(continuation);

    assert_eq!(observed.load(Ordering::SeqCst), 8);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(system.panicked_jobs(), 0);
}

#[test]
fn test_parallel_for_visits_every_index_once() {
    let system = JobSystem::new(4).unwrap();
    let visits: Arc<Vec<AtomicUsize>> = Arc::new((0..1000).map(|_| AtomicUsize::new(0)).collect());

    let leaf_visits = visits.clone();
    let root = system
        .parallel_for(1000, 16, move |range| {
            assert!(range.len() <= 16);
            for index in range {
                leaf_visits[index].fetch_add(1, Ordering::Relaxed);
            }
        })
        .unwrap();
    system.run(root).unwrap();
    system.wait(root);

    assert!(visits.iter().all(|count| count.load(Ordering::Relaxed) == 1));
}

#[test]
fn test_parallel_for_empty_range_runs_no_leaf() {
    let system = JobSystem::new(2).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let leaf_calls = calls.clone();
    let root = system
        .parallel_for(0, 8, move |_| {
            leaf_calls.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    system.run(root).unwrap();
    system.wait(root);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_parallel_for_slice_writes_in_place() {
    let system = JobSystem::new(4).unwrap();
    let mut data: Vec<u64> = (0..5000).collect();

    system
        .parallel_for_slice(&mut data, 64, |chunk| {
            for value in chunk {
                *value *= 2;
            }
        })
        .unwrap();

    assert!(data.iter().enumerate().all(|(i, &v)| v == 2 * i as u64));
}

#[test]
#[should_panic(expected = "splitter must be at least 1")]
fn test_parallel_for_zero_splitter_panics() {
    let system = JobSystem::new(1).unwrap();
    let _ = system.parallel_for(10, 0, |_| {});
}

#[test]
fn test_panicking_body_still_completes() {
    let system = JobSystem::new(2).unwrap();
    let survivor = Arc::new(AtomicBool::new(false));

    let flag = survivor.clone();
    let root = system
        .create_job(move |ctx| {
            ctx.spawn_child(|_| panic!("child failure")).unwrap();
            ctx.spawn_child(move |_| flag.store(true, Ordering::SeqCst))
                .unwrap();
        })
        .unwrap();

    system.run(root).unwrap();
    system.wait(root);
    assert!(survivor.load(Ordering::SeqCst));
    assert_eq!(system.panicked_jobs(), 1);
    system.stop().expect("a panicking job does not kill its worker");
}

#[test]
fn test_stale_handle_stays_complete_after_reuse() {
    let config = SchedulerConfig {
        pool_capacity: 2,
        ..SchedulerConfig::with_workers(1)
    };
    let system = JobSystem::start(config).unwrap();

    let first = system.create_job(|_| {}).unwrap();
    system.run(first).unwrap();
    system.wait(first);

    // Cycle the two slots so the first one is recycled.
    for _ in 0..2 {
        let job = system.create_job(|_| {}).unwrap();
        assert!(!system.is_complete(job));
        system.run(job).unwrap();
        system.wait(job);
    }
    let live = system.create_job(|_| {}).unwrap();
    assert!(system.is_complete(first));
    assert_eq!(system.pending_count(first), 0);
    assert!(!system.is_complete(live));
    assert_eq!(system.jobs_allocated(), 4);
}

#[test]
fn test_context_reports_worker_and_handle() {
    let system = JobSystem::new(3).unwrap();
    let seen = Arc::new(AtomicUsize::new(usize::MAX));

    let slot = seen.clone();
    let job = system
        .create_job(move |ctx: &JobContext<'_>| {
            assert_eq!(ctx.scheduler().current_worker(), Some(ctx.worker_index()));
            assert!(!ctx.scheduler().is_complete(ctx.job()));
            slot.store(ctx.worker_index(), Ordering::SeqCst);
        })
        .unwrap();
    system.run(job).unwrap();
    system.wait(job);
    assert!(seen.load(Ordering::SeqCst) < 3);
}

#[test]
fn test_child_of_completed_parent_does_not_leak_slot() {
    let config = SchedulerConfig {
        pool_capacity: 4,
        ..SchedulerConfig::with_workers(1)
    };
    let system = JobSystem::start(config).unwrap();

    let parent = system.create_job(|_| {}).unwrap();
    system.run(parent).unwrap();
    system.wait(parent);

    let late = system
        .create_job(move |ctx| {
            let _ = ctx.scheduler().create_job_as_child(parent, |_| {});
        })
        .unwrap();
    system.run(late).unwrap();
    system.wait(late);

    assert_eq!(system.panicked_jobs(), 1);
    assert_eq!(system.live_jobs(), 0);

    // Every slot is still usable.
    let jobs: Vec<_> = (0..4).map(|_| system.create_job(|_| {}).unwrap()).collect();
    for job in &jobs {
        system.run(*job).unwrap();
        system.wait(*job);
    }
}

#[test]
fn test_continuation_on_recycled_ancestor_is_rejected() {
    let config = SchedulerConfig {
        pool_capacity: 4,
        ..SchedulerConfig::with_workers(1)
    };
    let system = JobSystem::start(config).unwrap();
    let ran = Arc::new(AtomicBool::new(false));

    let ancestor = system.create_job(|_| {}).unwrap();
    system.run(ancestor).unwrap();
    system.wait(ancestor);

    let flag = ran.clone();
    let continuation = system
        .create_job(move |_| flag.store(true, Ordering::SeqCst))
        .unwrap();
    let _fillers: Vec<_> = (0..2).map(|_| system.create_job(|_| {}).unwrap()).collect();
    // The only free slot left is the ancestor's, so this job reuses it.
    let occupant = system.create_job(|_| {}).unwrap();
    assert_eq!(system.live_jobs(), 4);
    assert_ne!(occupant.generation(), ancestor.generation());

    assert!(matches!(
        system.add_continuation(ancestor, continuation),
        Err(crate::JobError::AlreadyComplete)
    ));

    system.run(occupant).unwrap();
    system.wait(occupant);
    assert!(!ran.load(Ordering::SeqCst), "the new occupant must not release it");

    system.run(continuation).unwrap();
    system.wait(continuation);
    assert!(ran.load(Ordering::SeqCst));
}

#[cfg(feature = "metrics")]
#[test]
fn test_scheduler_updates_metrics() {
    let system = JobSystem::new(1).unwrap();

    let root = system
        .create_job(|ctx| {
            for _ in 0..3 {
                ctx.spawn_child(|_| {}).unwrap();
            }
        })
        .unwrap();
    let continuation = system.create_job(|_| {}).unwrap();
    system.add_continuation(root, continuation).unwrap();
    system.run(root).unwrap();
    system.wait(continuation);

    // Root, three children and the continuation, all popped locally.
    let snapshot = system.metrics().snapshot();
    assert_eq!(snapshot.jobs_executed, 5);
    assert_eq!(snapshot.local_pops, 5);
    assert_eq!(snapshot.continuations_released, 1);
    assert_eq!(snapshot.steals_success, 0);
    assert_eq!(snapshot.inline_executions, 0);
}

#[cfg(feature = "metrics")]
#[test]
fn test_full_deque_counts_inline_execution() {
    let config = SchedulerConfig {
        deque_capacity: 1,
        ..SchedulerConfig::with_workers(1)
    };
    let system = JobSystem::start(config).unwrap();

    let root = system
        .create_job(|ctx| {
            ctx.spawn_child(|_| {}).unwrap();
            ctx.spawn_child(|_| {}).unwrap();
        })
        .unwrap();
    system.run(root).unwrap();
    system.wait(root);

    let snapshot = system.metrics().snapshot();
    assert_eq!(snapshot.inline_executions, 1);
    assert_eq!(snapshot.jobs_executed, 3);
}
