use std::sync::Arc;

use crate::job::{Job, Priority};
use crate::scheduler::{run, thread_count, wait_for_counter};

/// Splits `[0, count)` into batches of at least `min_batch_size` items,
/// runs `func(start, end)` for each batch in parallel, and blocks the
/// caller until all of them finish.
///
/// Batch sizing matches `ParallelFor.h`: divide the range evenly across
/// worker threads, but never below `min_batch_size` — below that, the
/// per-job overhead isn't worth the extra parallelism.
pub fn parallel_for<F>(count: usize, min_batch_size: usize, func: F)
where
    F: Fn(usize, usize) + Send + Sync + 'static,
{
    if count == 0 {
        return;
    }
    if count == 1 {
        func(0, 1);
        return;
    }

    let workers = thread_count().max(1);
    let batch_size = min_batch_size.max((count + workers - 1) / workers).max(1);
    let job_count = (count + batch_size - 1) / batch_size;

    let func = Arc::new(func);
    let jobs = (0..job_count)
        .map(|i| {
            let start = i * batch_size;
            let end = (start + batch_size).min(count);
            let func = Arc::clone(&func);
            Job::new(move || func(start, end))
        })
        .collect();

    let mut counter = None;
    run(jobs, &mut counter, Priority::Normal);
    let counter = counter.expect("run() always populates the counter for a non-empty job list");
    wait_for_counter(counter, true);
    crate::scheduler::free_counter(counter);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn zero_count_never_calls_func() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        // Not running under an initialized scheduler: count == 0 must
        // short-circuit before touching run()/wait_for_counter().
        parallel_for(0, 4, move |_, _| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn single_count_runs_inline() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        parallel_for(1, 4, move |start, end| {
            assert_eq!((start, end), (0, 1));
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
