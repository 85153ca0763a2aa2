use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::clock::{read_cycles, CycleClock};

// Process-wide run predicate. Every long-running loop (and every nested retry loop)
// polls is_running so cancellation latency stays bounded even under permanent
// backpressure. Explicitly constructed and passed around instead of living in a global.

pub struct Lifecycle {
    clock: CycleClock,
    /// Cycle timestamp of the configured end of the run window, u64::MAX if unlimited.
    stop_at: AtomicU64,
    /// Cycle timestamp of the first stop request (signal or explicit), u64::MAX if none.
    signal_at: AtomicU64,
}

impl Lifecycle {
    pub fn new(clock: CycleClock) -> Arc<Lifecycle> {
        Arc::new(Lifecycle {
            clock,
            stop_at: AtomicU64::new(u64::MAX),
            signal_at: AtomicU64::new(u64::MAX),
        })
    }

    /// True while neither the runtime deadline nor a stop request has passed.
    /// extra_time_ms grants a grace period: a caller asking with a tolerance still sees
    /// "running" for that long after the stop, which lets drain/cleanup code finish.
    #[inline]
    pub fn is_running(&self, extra_time_ms: u32) -> bool {
        let extra = extra_time_ms as u64 * self.clock.hz() / 1000;
        let time = read_cycles().wrapping_sub(extra);
        self.signal_at.load(Ordering::Relaxed) > time
            && self.stop_at.load(Ordering::Relaxed) > time
    }

    /// Arm the end of the run window run_time_ms from now.
    pub fn set_runtime(&self, run_time_ms: u64) {
        let deadline = read_cycles().wrapping_add(run_time_ms * self.clock.hz() / 1000);
        self.stop_at.store(deadline, Ordering::Relaxed);
    }

    /// Request a stop. Only the first request records the stop timestamp; repeated
    /// calls are no-ops so a second ^C cannot move the grace window.
    pub fn stop(&self) {
        let _ = self.signal_at.compare_exchange(
            u64::MAX,
            read_cycles(),
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
    }

    pub fn stop_requested(&self) -> bool {
        self.signal_at.load(Ordering::Relaxed) != u64::MAX
    }

    /// Route SIGINT/SIGTERM to stop(). Call at most once per process.
    pub fn install_signal_handlers(self: &Arc<Self>) -> Result<(), ctrlc::Error> {
        let lifecycle = Arc::clone(self);
        ctrlc::set_handler(move || lifecycle.stop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle() -> Arc<Lifecycle> {
        // The exact frequency only scales tolerances. A low one keeps the grace-period
        // cycle math far away from counter wraparound on freshly booted machines.
        Lifecycle::new(CycleClock::with_hz(1000))
    }

    #[test]
    fn runs_until_stopped() {
        let lc = lifecycle();
        assert!(lc.is_running(0));
        assert!(!lc.stop_requested());

        lc.stop();
        assert!(lc.stop_requested());
        assert!(!lc.is_running(0));
    }

    #[test]
    fn grace_period_after_stop() {
        let lc = lifecycle();
        lc.stop();

        assert!(!lc.is_running(0));
        // A large tolerance keeps the predicate true right after the stop
        assert!(lc.is_running(3_600_000));
    }

    #[test]
    fn stop_is_idempotent() {
        let lc = lifecycle();
        lc.stop();
        let first = lc.signal_at.load(Ordering::Relaxed);
        lc.stop();
        assert_eq!(lc.signal_at.load(Ordering::Relaxed), first);
    }

    #[test]
    fn runtime_deadline() {
        let lc = lifecycle();
        lc.set_runtime(0);
        // Deadline of "now"; by the time we ask, it has passed
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(!lc.is_running(0));
    }
}
