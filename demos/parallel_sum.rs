//! Sums a large array in parallel batches, then tears the scheduler down.
//!
//! Run with `cargo run --example parallel_sum`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn main() {
    env_logger::init();

    vjob::jobsys::init();

    let data: Arc<Vec<u64>> = Arc::new((0..1_000_000).collect());
    let total = Arc::new(AtomicU64::new(0));

    {
        let data = Arc::clone(&data);
        let total = Arc::clone(&total);
        vjob::jobsys::parallel_for(data.len(), 1024, move |start, end| {
            let partial: u64 = data[start..end].iter().sum();
            total.fetch_add(partial, Ordering::Relaxed);
        });
    }

    println!("sum = {}", total.load(Ordering::Relaxed));

    vjob::jobsys::shutdown();
}
