use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use thiserror::Error;

use crate::capture::CaptureWriter;
use crate::stats::StatsAccumulator;

// Correlates packet identifiers seen at ingress with their egress timestamps. One slot
// per masked identifier; per-slot locks so unrelated identifiers never serialize on a
// global lock. Everything that can go wrong on the data plane (overwrite, miss, bogus
// timestamps) is a counter, not an error.

#[derive(Debug, Error)]
pub enum CorrelatorError {
    #[error("index width must be between 1 and {} bits", MAX_INDEX_BITS)]
    InvalidIndexBits(u8),
}

const MAX_INDEX_BITS: u8 = 28;

#[derive(Debug, Clone, Copy)]
pub struct CorrelatorConfig {
    /// Width of the slot index in bits. The table has 2^index_bits slots; identifiers
    /// are masked down to this range.
    pub index_bits: u8,
    /// Store the full identifier next to the timestamp and treat a mismatch on
    /// completion as a miss. Disambiguates collisions when the identifier space is
    /// wider than the index space; disable only when they are the same width.
    pub check_tags: bool,
    /// Upper sanity bound for a latency sample, in timestamp units. Samples at or above
    /// this (or with pre >= post) count as invalid timestamps and never reach the mean.
    pub max_latency: u64,
}

impl Default for CorrelatorConfig {
    fn default() -> CorrelatorConfig {
        CorrelatorConfig {
            index_bits: 16,
            check_tags: true,
            max_latency: 1_000_000_000,
        }
    }
}

#[derive(Default, Clone, Copy)]
struct Slot {
    // 0 means empty; ingress timestamps of 0 are not representable
    timestamp: u64,
    tag: u32,
}

/// Running statistics of a correlator, as returned by fetch_stats().
#[derive(Debug, Default, Clone, Copy)]
pub struct CorrelatorStats {
    pub hits: u64,
    pub misses: u64,
    /// Misses observed before the very first hit, useful for spotting startup
    /// transients separately from steady-state loss.
    pub cold_misses: u64,
    /// Ingress entries that replaced a still-in-flight entry for the same slot.
    pub overwrites: u64,
    /// Matched pairs whose latency failed the sanity bound.
    pub invalid_timestamps: u64,
    pub write_errors: u64,
    /// Valid samples that went into the mean/variance.
    pub samples: u64,
    pub average_latency: f64,
    /// Sample variance of the latency. Reported as 0.0 when fewer than two samples
    /// exist (where it is mathematically undefined); check `samples` to tell the two
    /// apart.
    pub variance_latency: f64,
}

pub struct Correlator {
    mask: u32,
    check_tags: bool,
    max_latency: u64,
    slots: Vec<Mutex<Slot>>,

    hits: AtomicU64,
    misses: AtomicU64,
    cold_misses: AtomicU64,
    overwrites: AtomicU64,
    invalid_timestamps: AtomicU64,
    write_errors: AtomicU64,
    had_hit: AtomicBool,

    stats: Mutex<StatsAccumulator>,
    writer: Option<Mutex<CaptureWriter>>,
}

impl Correlator {
    pub fn new(config: CorrelatorConfig) -> Result<Correlator, CorrelatorError> {
        Correlator::build(config, None)
    }

    /// Offline mode: every matched pair is also appended to the writer before the
    /// validity filter runs, so a replay can re-derive (or re-judge) the statistics
    /// from the raw data.
    pub fn with_writer(
        config: CorrelatorConfig,
        writer: CaptureWriter,
    ) -> Result<Correlator, CorrelatorError> {
        Correlator::build(config, Some(writer))
    }

    fn build(
        config: CorrelatorConfig,
        writer: Option<CaptureWriter>,
    ) -> Result<Correlator, CorrelatorError> {
        if config.index_bits == 0 || config.index_bits > MAX_INDEX_BITS {
            return Err(CorrelatorError::InvalidIndexBits(config.index_bits));
        }

        let size = 1usize << config.index_bits;
        let slots = (0..size).map(|_| Mutex::new(Slot::default())).collect();

        Ok(Correlator {
            mask: (size - 1) as u32,
            check_tags: config.check_tags,
            max_latency: config.max_latency,
            slots,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            cold_misses: AtomicU64::new(0),
            overwrites: AtomicU64::new(0),
            invalid_timestamps: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            had_hit: AtomicBool::new(false),
            stats: Mutex::new(StatsAccumulator::new()),
            writer: writer.map(Mutex::new),
        })
    }

    /// Record the ingress timestamp for an identifier. A slot still holding an
    /// in-flight entry is overwritten and the loss is counted; keeping the table O(1)
    /// and allocation-free is worth losing the older measurement. The timestamp must be
    /// nonzero (zero is the empty sentinel).
    pub fn record_ingress(&self, id: u32, timestamp: u64) {
        debug_assert!(timestamp != 0);

        let index = (id & self.mask) as usize;
        let mut slot = self.slots[index].lock().unwrap();
        if slot.timestamp != 0 {
            self.overwrites.fetch_add(1, Ordering::Relaxed);
        }
        *slot = Slot {
            timestamp,
            tag: id,
        };
    }

    /// Look up and clear the identifier, returning the latency sample if the pair
    /// passed the sanity bound. Misses and invalid samples return None and are counted.
    pub fn complete(&self, id: u32, timestamp: u64) -> Option<u64> {
        let index = (id & self.mask) as usize;

        let pre = {
            let mut slot = self.slots[index].lock().unwrap();
            if slot.timestamp == 0 {
                None
            } else if self.check_tags && slot.tag != id {
                // Someone else's in-flight entry; leave it alone
                None
            } else {
                let pre = slot.timestamp;
                *slot = Slot::default();
                Some(pre)
            }
        };

        let pre = match pre {
            Some(pre) => pre,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                if !self.had_hit.load(Ordering::Relaxed) {
                    self.cold_misses.fetch_add(1, Ordering::Relaxed);
                }
                return None;
            }
        };

        self.hits.fetch_add(1, Ordering::Relaxed);
        self.had_hit.store(true, Ordering::Relaxed);

        if let Some(writer) = &self.writer {
            // Raw pair goes to disk before validation
            if writer.lock().unwrap().write_pair(pre, timestamp).is_err() {
                self.write_errors.fetch_add(1, Ordering::Relaxed);
            }
        }

        if pre < timestamp && timestamp - pre < self.max_latency {
            let latency = timestamp - pre;
            self.stats.lock().unwrap().update(latency as f64);
            Some(latency)
        } else {
            self.invalid_timestamps.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn fetch_stats(&self) -> CorrelatorStats {
        let snap = self.stats.lock().unwrap().snapshot();

        CorrelatorStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            cold_misses: self.cold_misses.load(Ordering::Relaxed),
            overwrites: self.overwrites.load(Ordering::Relaxed),
            invalid_timestamps: self.invalid_timestamps.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            samples: snap.count,
            average_latency: snap.mean,
            variance_latency: snap.variance.unwrap_or(0.0),
        }
    }

    /// Tear down, returning the capture writer (if any) so the caller can finish it.
    pub fn into_writer(self) -> Option<CaptureWriter> {
        self.writer.map(|w| w.into_inner().unwrap())
    }
}
