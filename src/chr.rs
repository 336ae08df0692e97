//! Histogram accumulator
//!
//! Highest-density-style interval construction over a discretized posterior.
//! Bins are consumed in order of decreasing mass until the requested coverage
//! is reached; the interval is the span of the consumed bins. A small
//! smoothing mass keeps empty bins reachable and breaks ties away from zero.
use crate::utils::argsort_desc;

pub struct HistogramAccumulator {
    /// Smoothed, normalized posterior masses.
    pi: Vec<f64>,
    /// Bin indices by decreasing mass, deterministic tie-break.
    order: Vec<usize>,
}

impl HistogramAccumulator {
    /// * `pdf` - Discretized posterior over counts `0..pdf.len()`.
    /// * `delta` - Smoothing mass spread uniformly over the bins.
    pub fn new(pdf: &[f64], delta: f64) -> Self {
        assert!(!pdf.is_empty(), "empty posterior histogram");
        let k = pdf.len() as f64;
        let mut pi: Vec<f64> = pdf.iter().map(|p| p + delta / k).collect();
        let z: f64 = pi.iter().sum();
        for p in pi.iter_mut() {
            *p /= z;
        }
        let order = argsort_desc(&pi);
        HistogramAccumulator { pi, order }
    }

    /// Smallest highest-density span holding at least `coverage` mass.
    pub fn predict_interval(&self, coverage: f64) -> (u64, u64) {
        let coverage = coverage.clamp(0.0, 1.0);
        let mut mass = 0.0;
        let mut lo = usize::MAX;
        let mut hi = 0;
        for &bin in &self.order {
            mass += self.pi[bin];
            lo = lo.min(bin);
            hi = hi.max(bin);
            if mass >= coverage {
                break;
            }
        }
        (lo as u64, hi as u64)
    }

    /// Accumulated mass at which the growing interval first covers `y`; the
    /// conformity score for two-sided Bayesian calibration. Returns 1.0 when
    /// `y` lies outside the histogram's support.
    pub fn calibrate_interval(&self, y: u64) -> f64 {
        let y = y as usize;
        if y >= self.pi.len() {
            return 1.0;
        }
        let mut mass = 0.0;
        let mut lo = usize::MAX;
        let mut hi = 0;
        for &bin in &self.order {
            mass += self.pi[bin];
            lo = lo.min(bin);
            hi = hi.max(bin);
            if lo <= y && y <= hi {
                return mass.min(1.0);
            }
        }
        1.0
    }
}
