//! Allocates and frees a handful of blocks from a `Tlsf` pool and prints
//! the resulting span layout, then runs a few prioritized jobs through
//! the scheduler to show `Priority` draining high-before-low.
//!
//! Run with `cargo run --example tlsf_debug`.

use std::sync::{Arc, Mutex};

use jobsys::{Job, Priority};
use tlsf::Tlsf;

fn main() {
    env_logger::init();

    let mut pool = Tlsf::new(64 * 1024, 4096).expect("valid pool parameters");
    let (first, _) = pool.alloc(256, 16).expect("pool has room");
    let (_second, handle) = pool.alloc(4096, 16).expect("pool has room");
    pool.free(handle);
    let (_third, _) = pool.alloc(512, 16).expect("pool has room");

    println!("allocations so far: {}", pool.allocation_count());
    for span in pool.debug_info() {
        println!("{:>8} bytes at {:>8}  {:?}", span.size, span.offset, span.state);
    }
    println!("first allocation offset: {first}");

    vjob::jobsys::init();

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut counter = None;
    for (priority, label) in [
        (Priority::Low, "low"),
        (Priority::High, "high"),
        (Priority::Normal, "normal"),
    ] {
        let order = Arc::clone(&order);
        vjob::jobsys::run(
            vec![Job::new(move || order.lock().unwrap().push(label))],
            &mut counter,
            priority,
        );
    }
    vjob::jobsys::wait_for_counter(counter.unwrap(), false);
    vjob::jobsys::free_counter(counter.unwrap());

    println!("drained in order: {:?}", order.lock().unwrap());

    vjob::jobsys::shutdown();
}
