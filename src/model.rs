//! Posterior models
//!
//! Opaque collaborators that turn a frozen sketch into a discrete posterior
//! distribution over an item's true count. Each hash row acts as one weak
//! expert: its bucket value upper-bounds the item's count and the surplus is
//! modeled as Poisson collision noise with an empirically fitted rate. The
//! aggregation rule decides how the row experts are combined.
//!
//! Fitting internals are deliberately simple; the calibration layer treats
//! models purely through [`PosteriorModel`].
use crate::errors::ConformalError;
use crate::sketch::CountMinSketch;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// Policy for combining the per-row expert posteriors into one distribution.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum AggregationRule {
    /// Product of experts: multiply row posteriors and renormalize.
    #[default]
    ProductOfExperts,
    /// Minimum of experts: trust only the row with the smallest bucket value.
    MinOfExperts,
}

/// Parameters produced by empirical-Bayes fitting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FittedPrior {
    /// Success probability of the geometric count prior.
    pub success_prob: f64,
    /// Mean bucket load the prior was fit against.
    pub mean_count: f64,
}

impl Default for FittedPrior {
    fn default() -> Self {
        FittedPrior {
            success_prob: 0.5,
            mean_count: 1.0,
        }
    }
}

/// A fitted probabilistic model bound to one sketch snapshot.
pub trait PosteriorModel {
    /// Discrete posterior over candidate true counts `0..=estimate(item)`.
    /// The returned vector is non-empty and sums to one.
    fn posterior(&self, item: u64) -> Vec<f64>;

    /// Fit the model's prior to the bound sketch (and any side data).
    fn empirical_bayes(&mut self) -> Result<FittedPrior, ConformalError>;

    fn aggregation(&self) -> AggregationRule;

    /// Swap the aggregation rule in place. Callers holding caches over
    /// posterior-derived values must invalidate them afterwards.
    fn set_aggregation(&mut self, rule: AggregationRule);
}

/// Combine the row experts for an item with bucket values `buckets` under a
/// log-prior `prior_log`, in log space to keep long supports stable.
fn combine_experts(
    sketch: &CountMinSketch,
    buckets: &[u64],
    rule: AggregationRule,
    prior_log: impl Fn(u64) -> f64,
) -> Vec<f64> {
    let c_min = buckets.iter().copied().min().unwrap_or(0);
    let support = (c_min + 1) as usize;
    let total = sketch.total_count() as f64;
    let other_buckets = (sketch.width().saturating_sub(1)).max(1) as f64;

    let active: Vec<u64> = match rule {
        AggregationRule::ProductOfExperts => buckets.to_vec(),
        AggregationRule::MinOfExperts => vec![c_min],
    };

    let mut log_post = vec![0.0_f64; support];
    for (y, lp) in log_post.iter_mut().enumerate() {
        *lp = prior_log(y as u64);
    }
    for &c_k in &active {
        // Expected collision mass per bucket, excluding the item's own bucket.
        let mu = ((total - c_k as f64) / other_buckets).max(1e-9);
        let ln_mu = mu.ln();
        // Poisson log-pmf of the surplus c_k - y, built incrementally as y
        // walks down from c_min.
        let n0 = c_k - c_min;
        let mut ln_fact: f64 = (1..=n0).map(|i| (i as f64).ln()).sum();
        let mut n = n0;
        for y in (0..support).rev() {
            log_post[y] += n as f64 * ln_mu - mu - ln_fact;
            if y > 0 {
                n += 1;
                ln_fact += (n as f64).ln();
            }
        }
    }

    // Normalize via log-sum-exp.
    let max_lp = log_post.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mut post: Vec<f64> = log_post.iter().map(|lp| (lp - max_lp).exp()).collect();
    let z: f64 = post.iter().sum();
    for p in post.iter_mut() {
        *p /= z;
    }
    post
}

/// Dirichlet-process flavored model: geometric prior fit to the sketch's
/// average bucket load, row experts combined by the aggregation rule.
pub struct BayesianDp {
    sketch: CountMinSketch,
    rule: AggregationRule,
    prior: Option<FittedPrior>,
}

impl BayesianDp {
    /// Bind the model to an owned snapshot of `sketch`.
    pub fn new(sketch: &CountMinSketch, rule: AggregationRule) -> Self {
        BayesianDp {
            sketch: sketch.clone(),
            rule,
            prior: None,
        }
    }
}

impl PosteriorModel for BayesianDp {
    fn posterior(&self, item: u64) -> Vec<f64> {
        let prior = self.prior.unwrap_or_default();
        let p = prior.success_prob;
        let ln_p = p.ln();
        let ln_q = (1.0 - p).ln();
        let buckets = self.sketch.apply_hash(item);
        let values: Vec<u64> = buckets
            .iter()
            .enumerate()
            .map(|(row, &col)| self.sketch.row_value(row, col))
            .collect();
        combine_experts(&self.sketch, &values, self.rule, |y| {
            ln_p + y as f64 * ln_q
        })
    }

    fn empirical_bayes(&mut self) -> Result<FittedPrior, ConformalError> {
        if self.sketch.total_count() == 0 {
            return Err(ConformalError::EmptySketch);
        }
        let mean_count = self.sketch.total_count() as f64 / self.sketch.width() as f64;
        let prior = FittedPrior {
            success_prob: 1.0 / (1.0 + mean_count),
            mean_count,
        };
        self.prior = Some(prior);
        Ok(prior)
    }

    fn aggregation(&self) -> AggregationRule {
        self.rule
    }

    fn set_aggregation(&mut self, rule: AggregationRule) {
        self.rule = rule;
    }
}

/// Normalized-generalized-gamma flavored model: blends the geometric prior
/// with a smoothed empirical distribution of the raw warm-up frequencies, so
/// the prior reflects the head of the observed label distribution.
pub struct SmoothedNgg {
    sketch: CountMinSketch,
    warmup_sample: Vec<u64>,
    rule: AggregationRule,
    prior: Option<FittedPrior>,
    /// Smoothed log-pmf of warm-up frequencies, indexed by count.
    empirical_log: Vec<f64>,
}

impl SmoothedNgg {
    /// * `sketch` - Sketch snapshot to bind.
    /// * `warmup_sample` - Raw item draws from the warm-up phase.
    pub fn new(sketch: &CountMinSketch, warmup_sample: &[u64], rule: AggregationRule) -> Self {
        SmoothedNgg {
            sketch: sketch.clone(),
            warmup_sample: warmup_sample.to_vec(),
            rule,
            prior: None,
            empirical_log: Vec::new(),
        }
    }

    fn prior_log(&self, y: u64, p: f64) -> f64 {
        let geometric = p.ln() + y as f64 * (1.0 - p).ln();
        match self.empirical_log.get(y as usize) {
            // Equal-weight blend of the empirical head and the geometric tail.
            Some(&emp) => {
                let m = emp.max(geometric);
                m + (0.5 * (emp - m).exp() + 0.5 * (geometric - m).exp()).ln()
            }
            None => 0.5_f64.ln() + geometric,
        }
    }
}

impl PosteriorModel for SmoothedNgg {
    fn posterior(&self, item: u64) -> Vec<f64> {
        let prior = self.prior.unwrap_or_default();
        let p = prior.success_prob;
        let buckets = self.sketch.apply_hash(item);
        let values: Vec<u64> = buckets
            .iter()
            .enumerate()
            .map(|(row, &col)| self.sketch.row_value(row, col))
            .collect();
        combine_experts(&self.sketch, &values, self.rule, |y| self.prior_log(y, p))
    }

    fn empirical_bayes(&mut self) -> Result<FittedPrior, ConformalError> {
        if self.sketch.total_count() == 0 || self.warmup_sample.is_empty() {
            return Err(ConformalError::EmptySketch);
        }
        let mut freq: HashMap<u64, u64> = HashMap::new();
        for &x in &self.warmup_sample {
            *freq.entry(x).or_insert(0) += 1;
        }
        let max_freq = freq.values().copied().max().unwrap_or(1) as usize;
        // Counts-of-counts with add-one smoothing; slot 0 holds unseen mass.
        let mut histogram = vec![1.0_f64; max_freq + 1];
        for &f in freq.values() {
            histogram[f as usize] += 1.0;
        }
        let z: f64 = histogram.iter().sum();
        self.empirical_log = histogram.iter().map(|h| (h / z).ln()).collect();

        let mean_count = self.sketch.total_count() as f64 / self.sketch.width() as f64;
        let prior = FittedPrior {
            success_prob: 1.0 / (1.0 + mean_count),
            mean_count,
        };
        self.prior = Some(prior);
        Ok(prior)
    }

    fn aggregation(&self) -> AggregationRule {
        self.rule
    }

    fn set_aggregation(&mut self, rule: AggregationRule) {
        self.rule = rule;
    }
}
