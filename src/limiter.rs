use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arraydeque::{ArrayDeque, Wrapping};
use rand::Rng;

use crate::clock::{deadline_passed, read_cycles, CycleClock};
use crate::device::{PacketMeta, TxBurst};
use crate::lifecycle::Lifecycle;
use crate::ring::RingConsumer;
use crate::BATCH_SIZE;

// Transmit thread: dequeues batches from the ring and sends them on a schedule set by
// the pacing policy. All waiting is busy-wait against the cycle counter; the only exits
// are the lifecycle predicate turning false or the runtime deadline passing.

/// Busy-wait until the cycle counter reaches deadline. Returns false if the run was
/// cancelled first, so every pacing wait doubles as a cancellation point.
#[inline]
pub fn spin_until(deadline: u64, lifecycle: &Lifecycle) -> bool {
    loop {
        if deadline_passed(read_cycles(), deadline) {
            return true;
        }
        if !lifecycle.is_running(0) {
            return false;
        }
        std::hint::spin_loop();
    }
}

pub struct RateLimiter<T, Q: TxBurst<T>> {
    clock: CycleClock,
    lifecycle: Arc<Lifecycle>,
    ring: RingConsumer<T>,
    tx: Q,
    sent: Arc<AtomicU64>,
}

impl<T, Q: TxBurst<T>> RateLimiter<T, Q> {
    pub fn new(
        clock: CycleClock,
        lifecycle: Arc<Lifecycle>,
        ring: RingConsumer<T>,
        tx: Q,
    ) -> RateLimiter<T, Q> {
        RateLimiter {
            clock,
            lifecycle,
            ring,
            tx,
            sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared counter of transmitted units, readable from other threads while the run
    /// loop owns the limiter.
    pub fn sent_counter(&self) -> Arc<AtomicU64> {
        self.sent.clone()
    }

    pub fn into_tx(self) -> Q {
        self.tx
    }

    /// Drain the ring as fast as the transmit path accepts packets. Blocks until
    /// cancellation.
    pub fn run_unthrottled(&mut self) {
        let mut batch: ArrayDeque<[T; BATCH_SIZE], Wrapping> = ArrayDeque::new();

        while self.lifecycle.is_running(0) {
            if batch.is_empty() {
                self.ring.dequeue_batch(&mut batch, BATCH_SIZE);
            }
            if batch.is_empty() {
                continue;
            }

            while !batch.is_empty() {
                let sent = self.tx.tx_burst(&mut batch, BATCH_SIZE);
                if sent > 0 {
                    self.sent.fetch_add(sent as u64, Ordering::Relaxed);
                } else if !self.lifecycle.is_running(0) {
                    // Shutdown under backpressure: the rest of the batch is abandoned
                    return;
                } else {
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Constant bit rate: one unit per interval. Blocks until cancellation.
    pub fn run_cbr(&mut self, interval: Duration) {
        let step = self.clock.cycles_for(interval);
        self.run_paced(move |_| step);
    }

    /// Transmit one unit, retrying against transmit backpressure. The cancellation
    /// predicate is checked on every retry so shutdown latency stays bounded even if
    /// the device never accepts another packet.
    fn send_front(&mut self, batch: &mut ArrayDeque<[T; BATCH_SIZE], Wrapping>) -> bool {
        loop {
            if self.tx.tx_burst(batch, 1) > 0 {
                self.sent.fetch_add(1, Ordering::Relaxed);
                return true;
            }
            if !self.lifecycle.is_running(0) {
                return false;
            }
            std::hint::spin_loop();
        }
    }

    // Shared pacing loop. advance() returns how many cycles next_send moves per unit.
    fn run_paced<F>(&mut self, mut advance: F)
    where
        F: FnMut(&T) -> u64,
    {
        let stall_tolerance = (self.clock.hz() / 100) as i64;
        let mut batch: ArrayDeque<[T; BATCH_SIZE], Wrapping> = ArrayDeque::new();
        let mut next_send = read_cycles();

        while self.lifecycle.is_running(0) {
            if batch.is_empty() {
                self.ring.dequeue_batch(&mut batch, BATCH_SIZE);
            }

            // Nothing scheduled for longer than the tolerance: resync instead of
            // bursting to catch up on the whole idle gap.
            let cur = read_cycles();
            if cur.wrapping_sub(next_send) as i64 > stall_tolerance {
                next_send = cur;
            }

            if batch.is_empty() {
                continue;
            }

            while !batch.is_empty() {
                let step = advance(batch.front().unwrap());
                if !spin_until(next_send, &self.lifecycle) {
                    return;
                }
                if !self.send_front(&mut batch) {
                    return;
                }
                next_send = next_send.wrapping_add(step);
            }
        }
    }
}

impl<T: PacketMeta, Q: TxBurst<T>> RateLimiter<T, Q> {
    /// Poisson traffic: exponentially distributed inter-packet gaps on top of each
    /// unit's wire-occupancy time. The gap distribution controls the residual spacing,
    /// not the full inter-departure time, since departures closer together than the
    /// packet's own transmission time are physically impossible. Blocks until
    /// cancellation.
    pub fn run_poisson(&mut self, target_interval: Duration, link_speed_mbps: u32) {
        let hz = self.clock.hz() as f64;
        let target_cycles = self.clock.cycles_for(target_interval) as f64;
        let link_bps = link_speed_mbps as f64 * 1_000_000.0;
        let mut rng = rand::thread_rng();

        self.run_paced(move |pkt| {
            // 24 bytes of preamble, FCS and inter-frame gap occupy the wire as well
            let wire_bits = (pkt.wire_len() + 24) as f64 * 8.0;
            let occupied = wire_bits / link_bps * hz;

            let mean_gap = target_cycles - occupied;
            let gap = if mean_gap <= 0.0 {
                // A maximum-rate stream has no residual gap left to randomize
                0.0
            } else {
                // Inverse-transform sample of Exp(1/mean_gap)
                -mean_gap * (1.0 - rng.gen::<f64>()).ln()
            };

            (occupied + gap) as u64
        });
    }
}
