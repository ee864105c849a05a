//! A fiber-based cooperative job scheduler.
//!
//! A fixed pool of worker threads runs jobs on a fixed pool of resumable
//! fibers. Submitting jobs ([`run`]) never blocks; waiting for them
//! ([`wait_for_counter`]) suspends the calling fiber instead of the
//! calling thread, so a worker thread keeps making progress on other
//! jobs while one of its fibers is parked.
//!
//! Grounded on `JobSystem.h`/`JobSystem.cpp` and `ParallelFor.h`: same
//! worker-loop shape (pinned-resumable, then shared-resumable, then job
//! queues by priority, else yield), same counter-based completion
//! tracking, same fiber pool sizing knobs.

mod config;
mod counter;
mod job;
mod parallel_for;
mod scheduler;

pub use config::SchedulerConfig;
pub use counter::CounterHandle;
pub use job::{Job, Priority};
pub use parallel_for::parallel_for;
pub use scheduler::{
    fiber_index, free_counter, init, init_with_config, is_managed_thread, run, shutdown,
    thread_count, thread_index, wait_for_counter,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    // These tests share a single process-lifetime scheduler, so they're
    // run together rather than in isolated `#[test]` functions that
    // would each try to call `init()`.
    #[test]
    fn scheduler_runs_jobs_and_reports_completion() {
        init_with_config(SchedulerConfig {
            fiber_pool_size: 16,
            max_threads: 4,
            ..SchedulerConfig::default()
        });

        let total = Arc::new(AtomicUsize::new(0));
        let mut counter = None;
        let jobs = (0..50)
            .map(|_| {
                let total = Arc::clone(&total);
                Job::new(move || {
                    total.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        run(jobs, &mut counter, Priority::Normal);
        wait_for_counter(counter.unwrap(), false);
        assert_eq!(total.load(Ordering::SeqCst), 50);
        free_counter(counter.unwrap());

        let total = Arc::new(AtomicUsize::new(0));
        parallel_for(1000, 10, {
            let total = Arc::clone(&total);
            move |start, end| {
                total.fetch_add(end - start, Ordering::SeqCst);
            }
        });
        assert_eq!(total.load(Ordering::SeqCst), 1000);

        assert!(is_managed_thread());
        assert_eq!(thread_index(), 0);
        assert!(thread_count() >= 1);

        shutdown();
    }
}
