use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use thiserror::Error;

use crate::stats::{StatsAccumulator, StatsSnapshot};

#[derive(Debug, Error)]
pub enum HistogramError {
    #[error("bucket width must be greater than zero")]
    InvalidBucketWidth,
    #[error("histogram io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fixed-bucket-width histogram with an embedded running mean/variance.
///
/// A bucket key is the greatest multiple of the bucket width not above the sample, so
/// bucket 0 covers [0, width) and bucket -width covers [-width, 0). Boundary samples go
/// into the bucket they name: with width 10, sample 5 lands in bucket 0 and sample -5
/// in bucket -10.
#[derive(Debug)]
pub struct Histogram {
    bucket_width: i64,
    storage: BTreeMap<i64, u64>,
    acc: StatsAccumulator,
}

impl Histogram {
    /// A zero bucket width is a configuration error, detected here rather than as a
    /// divide-by-zero later.
    pub fn new(bucket_width: u32) -> Result<Histogram, HistogramError> {
        if bucket_width == 0 {
            return Err(HistogramError::InvalidBucketWidth);
        }

        Ok(Histogram {
            bucket_width: bucket_width as i64,
            storage: BTreeMap::new(),
            acc: StatsAccumulator::new(),
        })
    }

    /// Record one sample. Returns false for negative samples; they are still counted
    /// and bucketed so callers can decide whether to treat them as suspicious.
    pub fn update(&mut self, sample: i64) -> bool {
        self.acc.update(sample as f64);

        let key = sample.div_euclid(self.bucket_width) * self.bucket_width;
        *self.storage.entry(key).or_insert(0) += 1;

        sample >= 0
    }

    pub fn count(&self) -> u64 {
        self.acc.count()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.acc.snapshot()
    }

    /// Bucket count for a key, zero if the bucket was never hit.
    pub fn bucket(&self, key: i64) -> u64 {
        *self.storage.get(&key).unwrap_or(&0)
    }

    pub fn buckets(&self) -> impl Iterator<Item = (&i64, &u64)> {
        self.storage.iter()
    }

    /// Dump "<bucket>,<count>" lines in ascending key order.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), HistogramError> {
        let mut file = BufWriter::new(File::create(path)?);

        for (key, count) in &self.storage {
            writeln!(file, "{},{}", key, count)?;
        }
        file.flush()?;

        Ok(())
    }
}
