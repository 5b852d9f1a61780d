use jobsteal::{JobContext, JobSystem, SchedulerConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const DEPTH: u32 = 8;
const BRANCHING: usize = 4;
const LEAVES: usize = BRANCHING.pow(DEPTH);

struct LeafLog {
    cursor: AtomicUsize,
    entries: Vec<AtomicUsize>,
}

impl LeafLog {
    fn new(capacity: usize) -> Self {
        Self {
            cursor: AtomicUsize::new(0),
            entries: (0..capacity).map(|_| AtomicUsize::new(usize::MAX)).collect(),
        }
    }

    fn append(&self, leaf: usize) {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.entries[index].store(leaf, Ordering::Relaxed);
    }
}

fn expand(ctx: &JobContext<'_>, depth: u32, id: usize, log: Arc<LeafLog>) {
    if depth == DEPTH {
        log.append(id);
        return;
    }
    for branch in 0..BRANCHING {
        let log = log.clone();
        ctx.spawn_child(move |ctx| expand(ctx, depth + 1, id * BRANCHING + branch, log))
            .unwrap();
    }
}

fn run_tree(workers: usize) {
    let config = SchedulerConfig {
        pool_capacity: 16_384,
        ..SchedulerConfig::with_workers(workers)
    };
    let system = JobSystem::start(config).unwrap();
    let log = Arc::new(LeafLog::new(LEAVES));

    let tree_log = log.clone();
    let root = system.create_job(move |ctx| expand(ctx, 0, 0, tree_log)).unwrap();
    system.run(root).unwrap();
    system.wait(root);

    assert_eq!(log.cursor.load(Ordering::Relaxed), LEAVES);
    let mut leaves: Vec<usize> = log
        .entries
        .iter()
        .map(|entry| entry.load(Ordering::Relaxed))
        .collect();
    leaves.sort_unstable();
    assert!(
        leaves.iter().copied().eq(0..LEAVES),
        "every leaf must run exactly once"
    );
    assert_eq!(system.panicked_jobs(), 0);
    system.stop().unwrap();
}

#[test]
fn test_tree_single_worker() {
    run_tree(1);
}

#[test]
fn test_tree_four_workers() {
    run_tree(4);
}

#[test]
fn test_tree_eight_workers() {
    run_tree(8);
}
