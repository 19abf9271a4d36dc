//! Streaming per-feature standardisation (Welford).
//!
//! `variance` holds the running sum of squared deviations, not the variance
//! itself. The standard deviation is `sqrt(variance / max(1, count - 1))`,
//! and reads as 1.0 while fewer than two samples have been seen or whenever
//! it degenerates to zero.

/// Below this a standard deviation is treated as zero.
const MIN_STD_DEV: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct RunningStats {
    mean: Vec<f64>,
    variance: Vec<f64>,
    count: u64,
}

impl RunningStats {
    pub fn new(dimension: usize) -> Self {
        Self {
            mean: vec![0.0; dimension],
            variance: vec![0.0; dimension],
            count: 0,
        }
    }

    /// Restore from persisted parts. Short inputs are zero-padded and long
    /// ones truncated to `dimension`; non-finite entries become 0.
    pub fn from_parts(dimension: usize, mean: Vec<f64>, variance: Vec<f64>, count: u64) -> Self {
        let fit = |mut v: Vec<f64>| {
            v.resize(dimension, 0.0);
            for x in v.iter_mut() {
                if !x.is_finite() {
                    *x = 0.0;
                }
            }
            v
        };
        let variance = fit(variance).into_iter().map(|v| v.max(0.0)).collect();
        Self {
            mean: fit(mean),
            variance,
            count,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn variance(&self) -> &[f64] {
        &self.variance
    }

    /// Fold one sample in. One call bumps the shared count once.
    pub fn observe(&mut self, values: &[f64]) {
        self.count += 1;
        let n = self.count as f64;
        for (i, (mean, m2)) in self.mean.iter_mut().zip(self.variance.iter_mut()).enumerate() {
            let x = values.get(i).copied().filter(|x| x.is_finite()).unwrap_or(0.0);
            let delta = x - *mean;
            *mean += delta / n;
            *m2 += delta * (x - *mean);
        }
    }

    pub fn std_dev(&self, index: usize) -> f64 {
        if self.count < 2 {
            return 1.0;
        }
        let m2 = self.variance.get(index).copied().unwrap_or(0.0);
        let denom = (self.count - 1).max(1) as f64;
        let sd = (m2 / denom).sqrt();
        if sd.is_finite() && sd >= MIN_STD_DEV {
            sd
        } else {
            1.0
        }
    }

    /// Standardised copy of `values`; never contains NaN or infinity.
    pub fn standardize(&self, values: &[f64]) -> Vec<f64> {
        (0..self.mean.len())
            .map(|i| {
                let x = values.get(i).copied().unwrap_or(0.0);
                let z = (x - self.mean[i]) / self.std_dev(i);
                if z.is_finite() { z } else { 0.0 }
            })
            .collect()
    }
}
