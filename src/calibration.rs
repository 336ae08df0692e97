//! Calibration engine
//!
//! Converts the conformity scores of the tracked calibration sample into
//! calibrated thresholds. Observed counts are split into quantile-defined
//! bins, each bin gets the finite-sample-corrected empirical quantile of its
//! scores, and the final threshold is the maximum across bins: the worst bin
//! sets the global threshold, over-covering the better-behaved ones.
use crate::constants::MIN_BIN_SIZE;
use crate::errors::ConformalError;
use crate::utils::{assign_bin, empirical_quantile};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

/// Calibrated per-bin quantiles and the final (max-over-bins) thresholds.
/// Immutable once computed; consumed only by `predict_interval`.
#[derive(Debug, Clone)]
pub struct CalibrationThresholds {
    /// Final low-side threshold, the maximum over bins.
    pub low: f64,
    /// Final high-side threshold, the maximum over bins.
    pub upp: f64,
    /// Quantile cutoffs that define the bins over observed counts.
    pub cutoffs: Vec<f64>,
    pub bin_low: Vec<f64>,
    pub bin_upp: Vec<f64>,
}

/// Cap the influence of heavy items: partition the calibration points into
/// `max(2, n / cap)` shuffled folds and keep one randomly chosen point per
/// fold, picked among each fold's unique-item representatives.
pub fn subsample_unique(
    items: &[u64],
    scores: &[(f64, f64)],
    counts: &[f64],
    cap: usize,
    rng: &mut StdRng,
) -> (Vec<(f64, f64)>, Vec<f64>) {
    let n = items.len();
    let n_folds = (n / cap.max(1)).max(2);
    let mut idx: Vec<usize> = (0..n).collect();
    idx.shuffle(rng);

    let mut kept_scores = Vec::with_capacity(n_folds);
    let mut kept_counts = Vec::with_capacity(n_folds);
    let fold_size = (n as f64 / n_folds as f64).max(1.0);
    for g in 0..n_folds {
        let start = (g as f64 * fold_size) as usize;
        let end = (((g + 1) as f64 * fold_size) as usize).min(n);
        if start >= end {
            continue;
        }
        let fold = &idx[start..end];
        // First occurrence per item within the fold.
        let mut seen: Vec<u64> = Vec::new();
        let mut unique_idx: Vec<usize> = Vec::new();
        for &i in fold {
            if !seen.contains(&items[i]) {
                seen.push(items[i]);
                unique_idx.push(i);
            }
        }
        let pick = unique_idx[rng.gen_range(0..unique_idx.len())];
        kept_scores.push(scores[pick]);
        kept_counts.push(counts[pick]);
    }
    (kept_scores, kept_counts)
}

/// Compute calibrated thresholds from `(score_low, score_upp)` pairs and
/// their observed counts.
///
/// * `n_bins` - Requested bin count; reduced so each bin can hold at least
///   `MIN_BIN_SIZE` points and further when quantile cutoffs are degenerate.
/// * `two_sided` - Halves the miscoverage per side; one-sided thresholds are
///   rounded up to preserve the sketch's integer upper-bias guarantee.
pub fn calibrate(
    scores: &[(f64, f64)],
    counts: &[f64],
    n_bins: usize,
    confidence: f64,
    two_sided: bool,
) -> Result<CalibrationThresholds, ConformalError> {
    if scores.is_empty() || counts.len() != scores.len() {
        return Err(ConformalError::EmptyCalibration);
    }
    let n = counts.len();
    let alpha = 1.0 - confidence;

    let n_bins_max = (n / MIN_BIN_SIZE).max(1);
    let requested = n_bins.max(1);
    let mut n_bins = requested.min(n_bins_max);
    if n_bins < requested {
        warn!(
            "Reducing calibration bins from {} to {} so each bin holds at least {} points.",
            requested, n_bins, MIN_BIN_SIZE
        );
    }

    // Quantile-defined bin cutoffs; duplicate cut points collapse, silently
    // reducing the bin count.
    let mut cutoffs: Vec<f64> = (0..=n_bins)
        .map(|k| empirical_quantile(counts, k as f64 / n_bins as f64))
        .collect();
    cutoffs.dedup();
    if cutoffs.len() < 2 {
        // All counts identical: a single bin holds everything.
        n_bins = 1;
    } else {
        n_bins = cutoffs.len() - 1;
    }
    info!("Cutoffs for {} bins: {:?}", n_bins, cutoffs);

    let bins: Vec<usize> = if cutoffs.len() < 2 {
        vec![0; n]
    } else {
        counts.iter().map(|&c| assign_bin(&cutoffs, c)).collect()
    };

    let mut bin_low = vec![0.0; n_bins];
    let mut bin_upp = vec![0.0; n_bins];
    for k in 0..n_bins {
        let in_bin: Vec<usize> = (0..n).filter(|&i| bins[i] == k).collect();
        let n_bin = in_bin.len();
        if n_bin == 0 {
            // Degrades coverage conservatively rather than aborting.
            warn!("Calibration bin {} is empty; defaulting its threshold to 0.", k);
            continue;
        }
        let level = if two_sided {
            (1.0 - alpha / 2.0) * (1.0 + 1.0 / n_bin as f64)
        } else {
            (1.0 - alpha) * (1.0 + 1.0 / n_bin as f64)
        };
        let score_low: Vec<f64> = in_bin.iter().map(|&i| scores[i].0).collect();
        let score_upp: Vec<f64> = in_bin.iter().map(|&i| scores[i].1).collect();
        bin_low[k] = empirical_quantile(&score_low, level);
        bin_upp[k] = empirical_quantile(&score_upp, level);
        if !two_sided {
            bin_low[k] = bin_low[k].ceil();
            bin_upp[k] = bin_upp[k].ceil();
        }
    }

    let low = bin_low.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let upp = bin_upp.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    info!("Calibrated thresholds (low): {:?}", bin_low);
    info!("Calibrated thresholds (upp): {:?}", bin_upp);
    info!("Calibrated thresholds (final): [{}, {}]", low, upp);

    Ok(CalibrationThresholds {
        low,
        upp,
        cutoffs,
        bin_low,
        bin_upp,
    })
}
