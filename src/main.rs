use jobsteal::{JobSystem, SchedulerConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const ELEMENTS: usize = 500_000;
const SPLITTER: usize = 256;
const FAN_OUT: usize = 1_000;

fn main() -> jobsteal::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("jobsteal - Fork-Join Job Scheduler\n");

    let config = SchedulerConfig::default();
    let workers = config.worker_count;
    let system = JobSystem::start(config)?;
    println!("Started job system with {workers} workers\n");

    // Example 1: element-wise work split into ranges
    println!("Example 1: ParallelFor over {ELEMENTS} floats (splitter {SPLITTER})");
    let mut values = vec![1.0f32; ELEMENTS];
    let start = Instant::now();
    let allocated_before = system.jobs_allocated();
    system.parallel_for_slice(&mut values, SPLITTER, |chunk| {
        for value in chunk {
            *value = (*value * 2.0).sqrt();
        }
    })?;
    let duration = start.elapsed();
    let checksum: f64 = values.iter().map(|&v| f64::from(v)).sum();
    println!(
        "  {} jobs in {:?}, checksum {:.3}\n",
        system.jobs_allocated() - allocated_before,
        duration,
        checksum
    );

    // Example 2: one root forking many children
    println!("Example 2: Fan-out of {FAN_OUT} child jobs");
    let sum = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let root_sum = sum.clone();
    let root = system.create_job(move |ctx| {
        for i in 0..FAN_OUT {
            let sum = root_sum.clone();
            let spawned = ctx.spawn_child(move |_| {
                let mut local = 0usize;
                for j in 0..1000 {
                    local = local.wrapping_add(j);
                }
                std::hint::black_box(local);
                sum.fetch_add(i, Ordering::Relaxed);
            });
            if let Err(err) = spawned {
                eprintln!("  child {i} not spawned: {err}");
            }
        }
    })?;
    system.run(root)?;
    system.wait(root);
    let duration = start.elapsed();
    let expected: usize = (0..FAN_OUT).sum();
    println!("  Executed {FAN_OUT} children in {duration:?}");
    println!(
        "  Sum result: {} (expected: {})\n",
        sum.load(Ordering::Relaxed),
        expected
    );

    println!("Shutting down job system...");
    system.stop()?;
    println!("Done!");
    Ok(())
}
