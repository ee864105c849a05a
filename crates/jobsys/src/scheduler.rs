use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::thread::JoinHandle;

use crossbeam_queue::{ArrayQueue, SegQueue};
use fiber::{Fiber, FiberId};
use spin_handle::SpinLock;

use crate::config::SchedulerConfig;
use crate::counter::CounterHandle;
use crate::job::{Job, Priority};

thread_local! {
    static THREAD_INDEX: Cell<Option<usize>> = Cell::new(None);
}

/// What a fiber should do, immediately upon becoming active, with the
/// fiber it just displaced.
///
/// Set by the outgoing fiber (keyed by the *target's* [`FiberId`]) right
/// before calling `Fiber::resume`, and consumed by the target the moment
/// it wakes — this is "the baton": the displaced fiber can't free itself
/// or release its own lock, because it might already be running
/// somewhere else by the time it would try to.
enum Baton {
    /// Put the displaced fiber back on the free-fiber queue.
    Free,
    /// The displaced fiber just parked itself waiting on `counter`; park
    /// it on the counter's waiter list and release the counter's lock,
    /// which it is still (cooperatively) holding.
    ParkInCounter(CounterHandle, Option<usize>),
    /// The displaced fiber is this OS thread's original (non-pooled)
    /// execution context; stash it so the thread can resume it and
    /// return cleanly at shutdown.
    ParkRoot(usize),
}

struct Scheduler {
    config: SchedulerConfig,
    thread_count: usize,

    jobs_high: SegQueue<Job>,
    jobs_normal: SegQueue<Job>,
    jobs_low: SegQueue<Job>,

    resumable: SegQueue<Fiber>,
    pinned_resumable: Vec<ArrayQueue<Fiber>>,
    free_fibers: SegQueue<Fiber>,
    free_counters: SegQueue<CounterHandle>,

    batons: SpinLock<HashMap<FiberId, Baton>>,
    root_park: SpinLock<HashMap<usize, Fiber>>,
    fiber_indices: HashMap<FiberId, usize>,

    stopped: AtomicBool,
    /// Barrier for shutdown: every spawned worker thread increments this
    /// as it notices `stopped`, then spins until it reaches the spawned
    /// worker count before handing back to its root context. Without
    /// this, a thread could exit and be joined while another worker is
    /// still mid-job and pushes a resumed waiter onto its now-abandoned
    /// pinned-resumable queue — a permanently lost wakeup.
    stopped_worker_count: AtomicUsize,
    worker_handles: SpinLock<Vec<JoinHandle<()>>>,
}

unsafe impl Send for Scheduler {}
unsafe impl Sync for Scheduler {}

static SCHEDULER: OnceLock<Scheduler> = OnceLock::new();

fn scheduler() -> &'static Scheduler {
    SCHEDULER.get().expect("job system not initialized — call jobsys::init() first")
}

fn set_baton(id: FiberId, baton: Baton) {
    scheduler().batons.lock().insert(id, baton);
}

fn take_baton(id: FiberId) -> Option<Baton> {
    scheduler().batons.lock().remove(&id)
}

/// Runs on every fiber immediately after it becomes active, dispatching
/// on whatever baton was left for it.
fn handle_displaced(displaced: Fiber) {
    let my_id = fiber::current().expect("fiber::init() was not called on this thread");
    match take_baton(my_id).unwrap_or(Baton::Free) {
        Baton::Free => scheduler().free_fibers.push(displaced),
        Baton::ParkInCounter(counter, resume_thread) => {
            counter.park_waiter(displaced, resume_thread);
            unsafe { counter.unlock() };
        }
        Baton::ParkRoot(thread_idx) => {
            scheduler().root_park.lock().insert(thread_idx, displaced);
        }
    }
}

fn pop_free_fiber_blocking() -> Fiber {
    loop {
        if let Some(fiber) = scheduler().free_fibers.pop() {
            return fiber;
        }
        std::thread::yield_now();
    }
}

fn pop_pinned_or_shared_resumable(thread_idx: usize) -> Option<Fiber> {
    scheduler()
        .pinned_resumable
        .get(thread_idx)
        .and_then(|q| q.pop())
        .or_else(|| scheduler().resumable.pop())
}

fn pop_next_job() -> Option<Job> {
    scheduler()
        .jobs_high
        .pop()
        .or_else(|| scheduler().jobs_normal.pop())
        .or_else(|| scheduler().jobs_low.pop())
}

fn run_job(job: Job) {
    (job.func)();
    if let Some(counter) = job.counter {
        let awoken = counter.decrement_and_drain();
        for (fiber, resume_thread) in awoken {
            match resume_thread {
                Some(thread_idx) => {
                    // Bounded queue: if it's somehow full, fall back to the
                    // shared queue rather than dropping the fiber.
                    if let Err(fiber) = scheduler().pinned_resumable[thread_idx].push(fiber) {
                        scheduler().resumable.push(fiber);
                    }
                }
                None => scheduler().resumable.push(fiber),
            }
        }
    }
}

/// Entry point for every fiber in the shared pool. Handles whatever
/// baton it was resumed with, then loops: pinned-resumable fiber, then
/// shared-resumable fiber, then a fresh job (by priority), else yield.
fn pool_fiber_body(displaced: Fiber) -> ! {
    handle_displaced(displaced);

    loop {
        let thread_idx = thread_index();

        if scheduler().stopped.load(Ordering::Acquire) {
            let sched = scheduler();

            // Barrier: wait for every spawned worker thread to also reach
            // this point before any of us hand back to our root context,
            // so no thread exits (and gets joined) while another worker
            // might still push a resumed waiter onto its queue.
            sched.stopped_worker_count.fetch_add(1, Ordering::AcqRel);
            while sched.stopped_worker_count.load(Ordering::Acquire) < sched.thread_count - 1 {
                std::thread::yield_now();
            }

            let root = sched
                .root_park
                .lock()
                .remove(&thread_idx)
                .expect("no parked root fiber for this thread at shutdown");
            set_baton(root.id(), Baton::Free);
            let displaced = unsafe { root.resume() };
            handle_displaced(displaced);
            unreachable!("resumed after handing control back to the thread's root fiber");
        }

        if let Some(fiber_to_resume) = pop_pinned_or_shared_resumable(thread_idx) {
            set_baton(fiber_to_resume.id(), Baton::Free);
            let displaced = unsafe { fiber_to_resume.resume() };
            handle_displaced(displaced);
            continue;
        }

        if let Some(job) = pop_next_job() {
            run_job(job);
            continue;
        }

        std::thread::yield_now();
    }
}

/// OS-thread entry point for every worker thread beyond the one that
/// calls [`init`]. Bootstraps a pool fiber and blocks until shutdown
/// hands control back, at which point the thread function returns and
/// the thread becomes joinable.
fn worker_thread_main(thread_idx: usize) {
    THREAD_INDEX.with(|t| t.set(Some(thread_idx)));
    log::info!("starting worker thread {thread_idx}");

    if scheduler().config.pin_to_core {
        log::debug!(
            "pin_to_core is set but core affinity is not implemented on this platform; \
             worker thread {thread_idx} will float freely"
        );
    }

    fiber::init();

    let first = pop_free_fiber_blocking();
    set_baton(first.id(), Baton::ParkRoot(thread_idx));
    let displaced = unsafe { first.resume() };
    handle_displaced(displaced);

    log::info!("shutting down worker thread {thread_idx}");
}

/// Returns the calling thread's stable index (`0` for the thread that
/// called [`init`]), or `usize::MAX` if this thread was never set up for
/// job system use.
///
/// `#[inline(never)]` matches the original's `__declspec(noinline)`:
/// both exist to keep this call from being folded across an inlining
/// boundary in a way that would stale thread-local caching assumptions.
#[inline(never)]
pub fn thread_index() -> usize {
    THREAD_INDEX.with(|t| t.get()).unwrap_or(usize::MAX)
}

pub fn is_managed_thread() -> bool {
    thread_index() != usize::MAX
}

/// Returns the stable index (`0..fiber_pool_size`) of the pool fiber the
/// calling code is currently running on.
///
/// # Panics
///
/// Panics if called from a thread's root context rather than from inside
/// a job — only pool fibers are assigned an index.
pub fn fiber_index() -> usize {
    let id = fiber::current().expect("fiber::init() was not called on this thread");
    *scheduler()
        .fiber_indices
        .get(&id)
        .expect("fiber_index() called outside a pool fiber")
}

pub fn thread_count() -> usize {
    scheduler().thread_count
}

pub fn config() -> SchedulerConfig {
    scheduler().config.clone()
}

/// Brings up the job system with default tuning. Panics if already
/// initialized, or if called again after [`shutdown`] — the scheduler is
/// a process-lifetime singleton.
pub fn init() {
    init_with_config(SchedulerConfig::default());
}

pub fn init_with_config(config: SchedulerConfig) {
    log::info!("starting job system");

    let thread_count = config.worker_count();
    let pinned_resumable = (0..thread_count)
        .map(|_| ArrayQueue::new(config.fiber_pool_size))
        .collect();

    let pool_fibers: Vec<Fiber> = (0..config.fiber_pool_size)
        .map(|_| Fiber::new(config.fiber_stack_size, pool_fiber_body))
        .collect();
    let fiber_indices = pool_fibers
        .iter()
        .enumerate()
        .map(|(index, fiber)| (fiber.id(), index))
        .collect();

    let scheduler_state = Scheduler {
        config: config.clone(),
        thread_count,
        jobs_high: SegQueue::new(),
        jobs_normal: SegQueue::new(),
        jobs_low: SegQueue::new(),
        resumable: SegQueue::new(),
        pinned_resumable,
        free_fibers: SegQueue::new(),
        free_counters: SegQueue::new(),
        batons: SpinLock::new(HashMap::new()),
        root_park: SpinLock::new(HashMap::new()),
        fiber_indices,
        stopped: AtomicBool::new(false),
        stopped_worker_count: AtomicUsize::new(0),
        worker_handles: SpinLock::new(Vec::new()),
    };

    SCHEDULER
        .set(scheduler_state)
        .unwrap_or_else(|_| panic!("job system already initialized"));

    for fiber in pool_fibers {
        scheduler().free_fibers.push(fiber);
    }

    THREAD_INDEX.with(|t| t.set(Some(0)));
    fiber::init();

    let handles: Vec<_> = (1..thread_count)
        .map(|i| {
            std::thread::Builder::new()
                .name(format!("worker-{i}"))
                .spawn(move || worker_thread_main(i))
                .expect("failed to spawn worker thread")
        })
        .collect();
    *scheduler().worker_handles.lock() = handles;

    log::info!("started job system with {thread_count} threads");
}

/// Stops the scheduler, joins every spawned worker thread (each only
/// exits once every worker has reached the shutdown barrier in
/// `pool_fiber_body`, so none is joined while another might still push a
/// waiter onto its queue), and destroys every counter left on the free
/// list. The calling thread must be the one that called [`init`]
/// (thread 0); any still-pending jobs or parked waiters are a caller
/// error, not something `shutdown` waits out.
pub fn shutdown() {
    log::info!("shutting down job system");

    let sched = scheduler();
    sched.stopped.store(true, Ordering::Release);

    let handles = std::mem::take(&mut *sched.worker_handles.lock());
    for handle in handles {
        handle.join().expect("worker thread panicked");
    }

    while let Some(counter) = sched.free_counters.pop() {
        unsafe { counter.destroy() };
    }

    log::info!("successfully shut down job system");
}

/// Submits `jobs` to run with priority `priority`, attaching them to
/// `*counter` (allocating or recycling one if `*counter` is `None`,
/// otherwise adding to its pending count).
pub fn run(jobs: Vec<Job>, counter: &mut Option<CounterHandle>, priority: Priority) {
    let count = jobs.len() as u32;

    let handle = match counter {
        Some(existing) => {
            existing.add_pending(count);
            *existing
        }
        None => {
            let handle = scheduler().free_counters.pop().unwrap_or_else(|| CounterHandle::allocate(0));
            handle.reset_pending(count);
            *counter = Some(handle);
            handle
        }
    };

    let queue = match priority {
        Priority::High => &scheduler().jobs_high,
        Priority::Normal => &scheduler().jobs_normal,
        Priority::Low => &scheduler().jobs_low,
    };

    for mut job in jobs {
        job.counter = Some(handle);
        queue.push(job);
    }
}

/// Suspends the calling fiber until `counter` reaches zero, running
/// other jobs on this thread in the meantime. If `stay_on_thread` is
/// `true`, the caller is resumed only on the thread it suspended on;
/// otherwise it may resume on any thread.
pub fn wait_for_counter(counter: CounterHandle, stay_on_thread: bool) {
    if counter.lock_and_check_done() {
        return;
    }

    let thread_idx = thread_index();
    let next_fiber = scheduler()
        .resumable
        .pop()
        .unwrap_or_else(pop_free_fiber_blocking);

    let resume_thread = if stay_on_thread { Some(thread_idx) } else { None };
    set_baton(next_fiber.id(), Baton::ParkInCounter(counter, resume_thread));

    let displaced = unsafe { next_fiber.resume() };
    handle_displaced(displaced);
}

/// Returns a counter to the free pool for reuse. The counter must have
/// no pending jobs and no parked waiters; violating that is a
/// programming error and panics, matching the original's assertions.
pub fn free_counter(counter: CounterHandle) {
    counter.assert_idle();
    scheduler().free_counters.push(counter);
}
