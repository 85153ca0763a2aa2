use std::time::Duration;

// All pacing deadlines are cycle-counter values. The counter is read raw (no
// serialization) because pacing only asks "what time is it?"; out-of-order reads are
// within the tolerance the stall check allows anyway.

/// Read the monotonic cycle counter. Non-serializing on x86_64 (plain RDTSC) and
/// aarch64 (CNTVCT_EL0); other targets fall back to CLOCK_MONOTONIC nanoseconds.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn read_cycles() -> u64 {
    let lo: u32;
    let hi: u32;
    unsafe {
        core::arch::asm!(
            "rdtsc",
            out("eax") lo,
            out("edx") hi,
            options(nostack, nomem, preserves_flags)
        );
    }
    ((hi as u64) << 32) | (lo as u64)
}

#[cfg(target_arch = "aarch64")]
#[inline(always)]
pub fn read_cycles() -> u64 {
    let cnt: u64;
    unsafe {
        core::arch::asm!(
            "mrs {cnt}, CNTVCT_EL0",
            cnt = out(reg) cnt,
            options(nostack, nomem, preserves_flags)
        );
    }
    cnt
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline(always)]
pub fn read_cycles() -> u64 {
    clock_ns()
}

pub(crate) fn clock_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

/// True once the counter has reached the deadline. Wrapping subtraction compared as
/// signed so counter wraparound does not turn into a near-infinite wait.
#[inline(always)]
pub(crate) fn deadline_passed(now: u64, deadline: u64) -> bool {
    now.wrapping_sub(deadline) as i64 >= 0
}

/// Cycle counter frequency, measured once at startup.
#[derive(Debug, Clone, Copy)]
pub struct CycleClock {
    hz: u64,
}

impl CycleClock {
    /// Measure the counter frequency against CLOCK_MONOTONIC. Called once at startup;
    /// the frequency is assumed constant for the process lifetime (invariant counter).
    pub fn calibrate() -> CycleClock {
        // Warm up before taking the two reference points
        for _ in 0..100 {
            let _ = read_cycles();
            let _ = clock_ns();
        }

        let c0 = read_cycles();
        let t0 = clock_ns();
        std::thread::sleep(Duration::from_millis(100));
        let c1 = read_cycles();
        let t1 = clock_ns();

        let cycles = c1.wrapping_sub(c0);
        let ns = t1.saturating_sub(t0);
        if cycles == 0 || ns == 0 {
            // Fallback counter counts nanoseconds
            return CycleClock { hz: 1_000_000_000 };
        }

        let hz = (cycles as u128 * 1_000_000_000 / ns as u128) as u64;
        CycleClock { hz }
    }

    /// Known-frequency constructor, mainly for tests.
    pub fn with_hz(hz: u64) -> CycleClock {
        CycleClock { hz }
    }

    pub fn hz(&self) -> u64 {
        self.hz
    }

    #[inline(always)]
    pub fn now(&self) -> u64 {
        read_cycles()
    }

    pub fn cycles_for(&self, duration: Duration) -> u64 {
        (duration.as_secs_f64() * self.hz as f64) as u64
    }

    pub fn duration_for(&self, cycles: u64) -> Duration {
        Duration::from_secs_f64(cycles as f64 / self.hz as f64)
    }
}
