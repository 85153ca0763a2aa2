//
// End-to-end run of the transmit pipeline: a pool-backed producer records ingress
// timestamps and enqueues packet handles, the rate limiter paces them out of the ring,
// and a loopback "device" completes each identifier against the correlator as it would
// be seen at egress. No NIC involved; the device seam is a test double.
//
use std::cmp::min;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use arraydeque::{ArrayDeque, Wrapping};

use pacegen::capture::{post_process, CaptureFormat, CaptureWriter};
use pacegen::clock::{read_cycles, CycleClock};
use pacegen::correlator::{Correlator, CorrelatorConfig};
use pacegen::device::{PacketPool, TxBurst, VecPool};
use pacegen::histogram::Histogram;
use pacegen::lifecycle::Lifecycle;
use pacegen::limiter::RateLimiter;
use pacegen::ring::RingChannel;
use pacegen::util::spawn_pinned;
use pacegen::BATCH_SIZE;

const NUM_PACKETS: u32 = 50;

#[derive(Debug, Clone, Copy)]
struct Packet {
    id: u32,
}

// Egress side of the loop: everything "transmitted" is immediately observed completing.
struct CompletingTx {
    correlator: Arc<Correlator>,
}

impl TxBurst<Packet> for CompletingTx {
    fn tx_burst(
        &mut self,
        bufs: &mut ArrayDeque<[Packet; BATCH_SIZE], Wrapping>,
        batch_size: usize,
    ) -> usize {
        let n = min(bufs.len(), batch_size);
        for _ in 0..n {
            let pkt = bufs.pop_front().unwrap();
            self.correlator.complete(pkt.id, read_cycles());
        }
        n
    }
}

#[test]
fn live_pipeline_end_to_end() {
    let clock = CycleClock::calibrate();
    let lifecycle = Lifecycle::new(clock);
    let correlator = Arc::new(Correlator::new(CorrelatorConfig::default()).unwrap());

    let mut pool = VecPool::new((0..NUM_PACKETS).map(|id| Packet { id }).collect());
    let (mut prod, cons) = RingChannel::new::<Packet>(256);

    let mut limiter = RateLimiter::new(
        clock,
        lifecycle.clone(),
        cons,
        CompletingTx {
            correlator: correlator.clone(),
        },
    );
    let counter = limiter.sent_counter();

    let tx_thread = spawn_pinned(0, "limiter", move || {
        limiter.run_cbr(Duration::from_micros(100));
    })
    .unwrap();

    while let Some(pkt) = pool.alloc() {
        correlator.record_ingress(pkt.id, read_cycles());
        prod.try_enqueue(pkt).unwrap();
    }

    while counter.load(Ordering::Relaxed) < NUM_PACKETS as u64 {
        std::hint::spin_loop();
    }
    lifecycle.stop();
    tx_thread.join().unwrap();

    let stats = correlator.fetch_stats();
    assert_eq!(stats.hits, NUM_PACKETS as u64);
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.overwrites, 0);
    assert_eq!(stats.invalid_timestamps, 0);
    assert_eq!(stats.samples, NUM_PACKETS as u64);
    // Every packet spent at least the time in flight the pacing imposed on it
    assert!(stats.average_latency > 0.0);
}

#[test]
fn offline_pipeline_replay() {
    let clock = CycleClock::calibrate();
    let lifecycle = Lifecycle::new(clock);

    let path = std::env::temp_dir().join("pacegen_pipeline_replay.bin");
    let writer = CaptureWriter::create(&path, CaptureFormat::Binary).unwrap();
    let correlator =
        Arc::new(Correlator::with_writer(CorrelatorConfig::default(), writer).unwrap());

    let (mut prod, cons) = RingChannel::new::<Packet>(256);
    let mut limiter = RateLimiter::new(
        clock,
        lifecycle.clone(),
        cons,
        CompletingTx {
            correlator: correlator.clone(),
        },
    );
    let counter = limiter.sent_counter();

    let tx_thread = spawn_pinned(0, "limiter", move || {
        limiter.run_unthrottled();
    })
    .unwrap();

    for id in 0..NUM_PACKETS {
        correlator.record_ingress(id, read_cycles());
        while prod.try_enqueue(Packet { id }).is_err() {
            std::hint::spin_loop();
        }
    }

    while counter.load(Ordering::Relaxed) < NUM_PACKETS as u64 {
        std::hint::spin_loop();
    }
    lifecycle.stop();
    tx_thread.join().unwrap();

    let live = correlator.fetch_stats();
    assert_eq!(live.write_errors, 0);

    // Tear down the correlator to flush the raw pair log, then replay it through the
    // same validity filter and bucket the samples.
    Arc::try_unwrap(correlator)
        .ok()
        .unwrap()
        .into_writer()
        .unwrap()
        .finish()
        .unwrap();

    let replayed = post_process(&path, CaptureFormat::Binary, 1_000_000_000).unwrap();
    assert_eq!(replayed.pairs, NUM_PACKETS as u64);
    assert_eq!(replayed.valid, live.samples);
    assert!((replayed.average_latency - live.average_latency).abs() < 1e-6);

    let mut hist = Histogram::new(1000).unwrap();
    let mut reader = pacegen::capture::CaptureReader::open(&path, CaptureFormat::Binary).unwrap();
    let mut bucketed = 0u64;
    while let Some(pair) = reader.next_pair().unwrap() {
        if pair.pre < pair.post {
            hist.update((pair.post - pair.pre) as i64);
            bucketed += 1;
        }
    }
    assert_eq!(hist.count(), bucketed);

    std::fs::remove_file(&path).unwrap();
}
