// Online mean/variance (Welford). One accumulator per observer thread; merge() exists
// so multiple partial accumulators can be combined at snapshot time instead of sharing
// one behind a per-sample lock.

#[derive(Debug, Default, Clone, Copy)]
pub struct StatsAccumulator {
    count: u64,
    mean: f64,
    m2: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub count: u64,
    pub mean: f64,
    /// Sample variance, m2 / (count - 1). None for fewer than two samples.
    pub variance: Option<f64>,
}

impl StatsAccumulator {
    pub fn new() -> StatsAccumulator {
        Default::default()
    }

    #[inline]
    pub fn update(&mut self, sample: f64) {
        self.count += 1;
        let delta = sample - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = sample - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let variance = if self.count < 2 {
            None
        } else {
            Some(self.m2 / (self.count - 1) as f64)
        };

        StatsSnapshot {
            count: self.count,
            mean: self.mean,
            variance,
        }
    }

    /// Fold another accumulator into this one (parallel Welford combine).
    pub fn merge(&mut self, other: &StatsAccumulator) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }

        let total = self.count + other.count;
        let delta = other.mean - self.mean;
        self.mean += delta * other.count as f64 / total as f64;
        self.m2 += other.m2 + delta * delta * (self.count as f64 * other.count as f64) / total as f64;
        self.count = total;
    }

    pub fn reset(&mut self) {
        *self = Default::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_sequence() {
        let mut acc = StatsAccumulator::new();
        for x in &[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            acc.update(*x);
        }

        let snap = acc.snapshot();
        assert_eq!(snap.count, 8);
        assert!((snap.mean - 5.0).abs() < 1e-12);
        assert!((snap.variance.unwrap() - 32.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn variance_undefined_below_two() {
        let mut acc = StatsAccumulator::new();
        assert_eq!(acc.snapshot().variance, None);

        acc.update(3.0);
        let snap = acc.snapshot();
        assert_eq!(snap.count, 1);
        assert_eq!(snap.mean, 3.0);
        assert_eq!(snap.variance, None);
    }

    #[test]
    fn merge_matches_sequential() {
        let samples = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];

        let mut whole = StatsAccumulator::new();
        for x in &samples {
            whole.update(*x);
        }

        let mut left = StatsAccumulator::new();
        let mut right = StatsAccumulator::new();
        for x in &samples[..3] {
            left.update(*x);
        }
        for x in &samples[3..] {
            right.update(*x);
        }
        left.merge(&right);

        let a = whole.snapshot();
        let b = left.snapshot();
        assert_eq!(a.count, b.count);
        assert!((a.mean - b.mean).abs() < 1e-12);
        assert!((a.variance.unwrap() - b.variance.unwrap()).abs() < 1e-9);
    }

    #[test]
    fn merge_into_empty() {
        let mut a = StatsAccumulator::new();
        let mut b = StatsAccumulator::new();
        b.update(1.0);
        b.update(2.0);

        a.merge(&b);
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn reset_clears() {
        let mut acc = StatsAccumulator::new();
        acc.update(5.0);
        acc.reset();
        assert_eq!(acc.count(), 0);
        assert_eq!(acc.snapshot().mean, 0.0);
    }
}
