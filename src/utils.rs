//! Utility functions
//!
//! Small numeric helpers shared by the calibration engine and the scoring
//! strategies.

/// Empirical quantile with the ceiling convention used in conformal
/// calibration: the smallest order statistic whose cumulative fraction is at
/// least `level`.
///
/// * `v` - Values to take the quantile of. Must be non-empty.
/// * `level` - Quantile level, values outside [0, 1] are clamped.
pub fn empirical_quantile(v: &[f64], level: f64) -> f64 {
    debug_assert!(!v.is_empty(), "quantile of an empty slice");
    let mut sorted = v.to_owned();
    sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len();
    let level = level.clamp(0.0, 1.0);
    let rank = (level * n as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(n - 1)]
}

/// Map a value to its quantile bin given sorted bin cutoffs.
///
/// Cutoffs partition the line into `cutoffs.len() - 1` bins; values below the
/// first cutoff fall in bin 0 and values at or above the last cutoff fall in
/// the last bin, so every value is assigned somewhere.
pub fn assign_bin(cutoffs: &[f64], v: f64) -> usize {
    if cutoffs.len() < 2 {
        return 0;
    }
    let n_bins = cutoffs.len() - 1;
    let mut low = 0;
    let mut high = n_bins;
    while low != high {
        let mid = (low + high) / 2;
        if cutoffs[mid + 1] <= v {
            low = mid + 1;
        } else {
            high = mid;
        }
    }
    low.min(n_bins - 1)
}

/// Cumulative sums of `p` taken from the back: `out[i] = p[n-1-i] + ... + p[n-1]`.
pub fn reverse_cumsum(p: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(p.len());
    let mut acc = 0.0;
    for v in p.iter().rev() {
        acc += v;
        out.push(acc);
    }
    out
}

/// Indices of `v` sorted by decreasing value, ties broken by index so the
/// order is deterministic.
pub fn argsort_desc(v: &[f64]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..v.len()).collect();
    idx.sort_by(|a, b| v[*b].partial_cmp(&v[*a]).unwrap().then(a.cmp(b)));
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empirical_quantile() {
        let v: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        assert_eq!(empirical_quantile(&v, 0.5), 50.0);
        assert_eq!(empirical_quantile(&v, 0.0), 1.0);
        assert_eq!(empirical_quantile(&v, 1.0), 100.0);
        // Levels above 1.0 clamp to the maximum.
        assert_eq!(empirical_quantile(&v, 1.5), 100.0);
        // The finite-sample corrected level from the calibration engine:
        // (1 - 0.1) * (1 + 1/100) = 0.909 -> ceil(90.9) = 91st order statistic.
        let level = (1.0 - 0.1) * (1.0 + 1.0 / 100.0);
        assert_eq!(empirical_quantile(&v, level), 91.0);
    }

    #[test]
    fn test_empirical_quantile_unsorted() {
        let v = vec![3.0, 1.0, 2.0];
        assert_eq!(empirical_quantile(&v, 1.0), 3.0);
        assert_eq!(empirical_quantile(&v, 0.34), 2.0);
    }

    #[test]
    fn test_assign_bin() {
        let cutoffs = vec![0.0, 10.0, 20.0, 30.0];
        assert_eq!(assign_bin(&cutoffs, -5.0), 0);
        assert_eq!(assign_bin(&cutoffs, 0.0), 0);
        assert_eq!(assign_bin(&cutoffs, 9.9), 0);
        assert_eq!(assign_bin(&cutoffs, 10.0), 1);
        assert_eq!(assign_bin(&cutoffs, 29.9), 2);
        // Values at or past the last cutoff stay in the last bin.
        assert_eq!(assign_bin(&cutoffs, 30.0), 2);
        assert_eq!(assign_bin(&cutoffs, 1e9), 2);
    }

    #[test]
    fn test_reverse_cumsum() {
        let p = vec![0.1, 0.2, 0.7];
        let c = reverse_cumsum(&p);
        assert!((c[0] - 0.7).abs() < 1e-12);
        assert!((c[1] - 0.9).abs() < 1e-12);
        assert!((c[2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_argsort_desc() {
        let v = vec![0.3, 0.5, 0.1, 0.5];
        assert_eq!(argsort_desc(&v), vec![1, 3, 0, 2]);
    }
}
