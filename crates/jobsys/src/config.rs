/// Tunables for [`crate::Scheduler`], with defaults matching the
/// constants `JobSystem.cpp` hard-codes (`k_numFibers`, `k_maxNumThreads`).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Size of the fiber pool. Bounds how many jobs can be suspended
    /// (waiting on a counter) at once; exhausting it is a logic error,
    /// not a recoverable condition (spec'd as fatal).
    pub fiber_pool_size: usize,
    /// Upper bound on worker thread count, independent of detected
    /// hardware concurrency.
    pub max_threads: usize,
    /// Stack size for each pool fiber, in bytes.
    pub fiber_stack_size: usize,
    /// Pin each worker thread to a specific core 1:1. Defaults to
    /// `false`, matching `k_pinToCore` in the original.
    pub pin_to_core: bool,
}

impl Default for SchedulerConfig {
    fn default() -> SchedulerConfig {
        SchedulerConfig {
            fiber_pool_size: 128,
            max_threads: 64,
            fiber_stack_size: fiber::DEFAULT_STACK_SIZE,
            pin_to_core: false,
        }
    }
}

impl SchedulerConfig {
    /// Hardware thread count to use for worker sizing: `num_cpus::get()`,
    /// falling back to 4 if the platform reports 0 (containers/CI runners
    /// sometimes do), then capped at `max_threads`.
    pub(crate) fn worker_count(&self) -> usize {
        let detected = num_cpus::get();
        let detected = if detected == 0 { 4 } else { detected };
        detected.min(self.max_threads)
    }
}
