//! Scoring strategies
//!
//! Conformity-score and interval-prediction objects. Every strategy binds an
//! owned, frozen snapshot of the sketch (and possibly a fitted model) at
//! construction time, so the live sketch can keep evolving without silently
//! invalidating the strategy's caches.
//!
//! A score measures by how much the raw point estimate must be adjusted to
//! become a valid bound; `predict_interval` applies calibrated thresholds to
//! produce a concrete interval, clipped to `[0, estimate]`.
use crate::bootstrap::{BootstrapChr, BootstrapOneSided, BootstrapTwoSided};
use crate::cache::BoundedCache;
use crate::chr::HistogramAccumulator;
use crate::constants::{CACHE_CAPACITY, CHR_SMOOTHING, CONFIDENCE_GRID, GRID_EPSILON};
use crate::errors::ConformalError;
use crate::model::PosteriorModel;
use crate::sketch::CountMinSketch;
use crate::utils::reverse_cumsum;
use serde::{Deserialize, Serialize};

/// Selector for the closed set of scoring strategies.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ScorerKind {
    /// Constant offset from the raw point estimate, no auxiliary model.
    Classical,
    /// Rank-based scores from the fitted posterior.
    #[default]
    Bayesian,
    /// Monte Carlo noise-distribution debiasing.
    Bootstrap,
    /// Bootstrap with calibrated quantile intervals.
    BootstrapChr,
}

/// One conformity-scoring rule with its interval predictor.
pub trait ScoringStrategy {
    /// Low- and high-side conformity scores for an observed `(item, count)`
    /// pair; one-sided strategies return `(score, 0)`.
    fn compute_score(&mut self, item: u64, count: u64) -> Result<(f64, f64), ConformalError>;

    /// Apply calibrated thresholds to produce a concrete interval. The lower
    /// bound is clipped at zero and the upper bound never exceeds the
    /// sketch's structurally guaranteed ceiling.
    fn predict_interval(
        &mut self,
        item: u64,
        tau_low: f64,
        tau_upp: f64,
    ) -> Result<(u64, u64), ConformalError>;

    /// Identifier used for cache keys and result labels.
    fn name(&self) -> &'static str;
}

/// One-sided constant-offset scores.
pub struct ClassicalOneSided {
    sketch: CountMinSketch,
}

impl ClassicalOneSided {
    pub fn new(sketch: &CountMinSketch) -> Self {
        ClassicalOneSided {
            sketch: sketch.clone(),
        }
    }
}

impl ScoringStrategy for ClassicalOneSided {
    fn compute_score(&mut self, item: u64, count: u64) -> Result<(f64, f64), ConformalError> {
        let upper = self.sketch.estimate_count(item) as f64;
        Ok((upper - count as f64, 0.0))
    }

    fn predict_interval(
        &mut self,
        item: u64,
        tau_low: f64,
        _tau_upp: f64,
    ) -> Result<(u64, u64), ConformalError> {
        let upper = self.sketch.estimate_count(item);
        let lower = (upper as f64 - tau_low).max(0.0) as u64;
        Ok((lower.min(upper), upper))
    }

    fn name(&self) -> &'static str {
        "classical1s"
    }
}

/// Two-sided constant-offset scores.
pub struct ClassicalTwoSided {
    sketch: CountMinSketch,
}

impl ClassicalTwoSided {
    pub fn new(sketch: &CountMinSketch) -> Self {
        ClassicalTwoSided {
            sketch: sketch.clone(),
        }
    }
}

impl ScoringStrategy for ClassicalTwoSided {
    fn compute_score(&mut self, item: u64, count: u64) -> Result<(f64, f64), ConformalError> {
        let upper = self.sketch.estimate_count(item) as f64;
        Ok((upper - count as f64, count as f64 - upper))
    }

    fn predict_interval(
        &mut self,
        item: u64,
        tau_low: f64,
        tau_upp: f64,
    ) -> Result<(u64, u64), ConformalError> {
        let ceiling = self.sketch.estimate_count(item);
        let lower = (ceiling as f64 - tau_low).max(0.0).min(ceiling as f64) as u64;
        let upper = (ceiling as f64 + tau_upp)
            .min(ceiling as f64)
            .max(lower as f64) as u64;
        Ok((lower, upper))
    }

    fn name(&self) -> &'static str {
        "classical2s"
    }
}

/// One-sided rank score over a discretized confidence grid.
///
/// The score is the smallest grid index whose implied lower bound (the number
/// of reverse-CDF positions at or above the grid level) does not exceed the
/// observed count, falling back to the last index.
pub struct BayesianOneSided<'a> {
    model: &'a dyn PosteriorModel,
    sketch: CountMinSketch,
    t_seq: Vec<f64>,
    score_cache: BoundedCache<(u64, u64), f64>,
}

impl<'a> BayesianOneSided<'a> {
    pub fn new(model: &'a dyn PosteriorModel, sketch: &CountMinSketch) -> Self {
        let t_seq = (0..CONFIDENCE_GRID)
            .map(|i| i as f64 / (CONFIDENCE_GRID - 1) as f64)
            .collect();
        BayesianOneSided {
            model,
            sketch: sketch.clone(),
            t_seq,
            score_cache: BoundedCache::new(CACHE_CAPACITY),
        }
    }
}

impl ScoringStrategy for BayesianOneSided<'_> {
    fn compute_score(&mut self, item: u64, count: u64) -> Result<(f64, f64), ConformalError> {
        if let Some(&score) = self.score_cache.get(&(item, count)) {
            return Ok((score, 0.0));
        }
        let cdfi = reverse_cumsum(&self.model.posterior(item));
        // The implied lower bound shrinks as the grid level rises, so the
        // first qualifying index is the minimum.
        let mut score = self.t_seq.len() - 1;
        for (idx, &t) in self.t_seq.iter().enumerate() {
            let implied_lower = cdfi.iter().filter(|&&c| c >= t).count() as u64;
            if implied_lower <= count {
                score = idx;
                break;
            }
        }
        let score = score as f64;
        self.score_cache.insert((item, count), score);
        Ok((score, 0.0))
    }

    fn predict_interval(
        &mut self,
        item: u64,
        tau_low: f64,
        _tau_upp: f64,
    ) -> Result<(u64, u64), ConformalError> {
        let upper = self.sketch.estimate_count(item);
        let posterior = self.model.posterior(item);
        let cdfi = reverse_cumsum(&posterior);
        let idx = (tau_low.max(0.0) as usize).min(self.t_seq.len() - 1);
        let tau = self.t_seq[idx];
        let first_above = cdfi
            .iter()
            .position(|&c| c >= tau - GRID_EPSILON)
            .unwrap_or(cdfi.len() - 1);
        let lower = (posterior.len() - first_above - 1) as u64;
        Ok((lower.min(upper), upper))
    }

    fn name(&self) -> &'static str {
        "bayes1s"
    }
}

/// Two-sided highest-density intervals from the discretized posterior.
pub struct BayesianTwoSided<'a> {
    model: &'a dyn PosteriorModel,
    score_cache: BoundedCache<(u64, u64), f64>,
}

impl<'a> BayesianTwoSided<'a> {
    pub fn new(model: &'a dyn PosteriorModel) -> Self {
        BayesianTwoSided {
            model,
            score_cache: BoundedCache::new(CACHE_CAPACITY),
        }
    }
}

impl ScoringStrategy for BayesianTwoSided<'_> {
    fn compute_score(&mut self, item: u64, count: u64) -> Result<(f64, f64), ConformalError> {
        if let Some(&score) = self.score_cache.get(&(item, count)) {
            return Ok((score, 0.0));
        }
        let accumulator = HistogramAccumulator::new(&self.model.posterior(item), CHR_SMOOTHING);
        let score = accumulator.calibrate_interval(count);
        self.score_cache.insert((item, count), score);
        Ok((score, 0.0))
    }

    fn predict_interval(
        &mut self,
        item: u64,
        tau_low: f64,
        _tau_upp: f64,
    ) -> Result<(u64, u64), ConformalError> {
        let accumulator = HistogramAccumulator::new(&self.model.posterior(item), CHR_SMOOTHING);
        Ok(accumulator.predict_interval(tau_low))
    }

    fn name(&self) -> &'static str {
        "bayes2s"
    }
}

/// Construct the configured scoring strategy over a frozen sketch snapshot.
///
/// * `model` - Required for the Bayesian kinds; bootstrap and classical kinds
///   ignore it.
/// * `seed` - Seeds the private RNG of the bootstrap kinds.
pub fn build_scorer<'a>(
    kind: ScorerKind,
    two_sided: bool,
    sketch: &CountMinSketch,
    model: Option<&'a dyn PosteriorModel>,
    confidence: f64,
    n_mc: usize,
    seed: u64,
) -> Result<Box<dyn ScoringStrategy + 'a>, ConformalError> {
    let alpha = 1.0 - confidence;
    match (kind, two_sided) {
        (ScorerKind::Classical, false) => Ok(Box::new(ClassicalOneSided::new(sketch))),
        (ScorerKind::Classical, true) => Ok(Box::new(ClassicalTwoSided::new(sketch))),
        (ScorerKind::Bayesian, false) => {
            let model = model.ok_or_else(|| {
                ConformalError::ModelNotFitted("a Bayesian scoring strategy".to_string())
            })?;
            Ok(Box::new(BayesianOneSided::new(model, sketch)))
        }
        (ScorerKind::Bayesian, true) => {
            let model = model.ok_or_else(|| {
                ConformalError::ModelNotFitted("a Bayesian scoring strategy".to_string())
            })?;
            Ok(Box::new(BayesianTwoSided::new(model)))
        }
        (ScorerKind::Bootstrap, false) => {
            Ok(Box::new(BootstrapOneSided::new(sketch, alpha, n_mc, seed)))
        }
        (ScorerKind::Bootstrap, true) => {
            Ok(Box::new(BootstrapTwoSided::new(sketch, alpha, n_mc, seed)))
        }
        // The calibrated-interval bootstrap is two-sided by construction.
        (ScorerKind::BootstrapChr, _) => Ok(Box::new(BootstrapChr::new(sketch, alpha, n_mc, seed))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AggregationRule, FittedPrior};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn populated_sketch() -> CountMinSketch {
        let mut rng = StdRng::seed_from_u64(31);
        let mut sketch = CountMinSketch::new(4, 64, 7);
        for _ in 0..4000 {
            sketch.update(rng.gen_range(0..120u64));
        }
        sketch
    }

    /// Stub posterior provider with a fixed triangular shape over the
    /// sketch's support.
    struct StubModel {
        sketch: CountMinSketch,
        rule: AggregationRule,
    }

    impl PosteriorModel for StubModel {
        fn posterior(&self, item: u64) -> Vec<f64> {
            let support = self.sketch.estimate_count(item) as usize + 1;
            let raw: Vec<f64> = (0..support).map(|y| (y + 1) as f64).collect();
            let z: f64 = raw.iter().sum();
            raw.into_iter().map(|v| v / z).collect()
        }

        fn empirical_bayes(&mut self) -> Result<FittedPrior, ConformalError> {
            Ok(FittedPrior::default())
        }

        fn aggregation(&self) -> AggregationRule {
            self.rule
        }

        fn set_aggregation(&mut self, rule: AggregationRule) {
            self.rule = rule;
        }
    }

    #[test]
    fn test_classical_score_threshold_roundtrip() {
        let sketch = populated_sketch();
        let mut scorer = ClassicalOneSided::new(&sketch);
        for item in [0u64, 10, 50] {
            let truth = sketch.exact_count(item);
            let (score, zero) = scorer.compute_score(item, truth).unwrap();
            assert_eq!(zero, 0.0);
            // A threshold equal to the item's own score makes its bound valid.
            let (lower, upper) = scorer.predict_interval(item, score, 0.0).unwrap();
            assert!(lower <= truth);
            assert!(upper >= truth);
        }
    }

    #[test]
    fn test_interval_monotone_in_threshold() {
        let sketch = populated_sketch();
        let mut one_sided = ClassicalOneSided::new(&sketch);
        let mut two_sided = ClassicalTwoSided::new(&sketch);
        for item in [3u64, 42, 99] {
            let mut prev_1s = one_sided.predict_interval(item, 0.0, 0.0).unwrap();
            let mut prev_2s = two_sided.predict_interval(item, 0.0, 0.0).unwrap();
            for tau in [1.0, 2.0, 5.0, 20.0, 1000.0] {
                let cur_1s = one_sided.predict_interval(item, tau, 0.0).unwrap();
                assert!(cur_1s.0 <= prev_1s.0);
                assert_eq!(cur_1s.1, prev_1s.1);
                prev_1s = cur_1s;

                let cur_2s = two_sided.predict_interval(item, tau, tau).unwrap();
                assert!(cur_2s.0 <= prev_2s.0);
                assert!(cur_2s.1 >= prev_2s.1);
                prev_2s = cur_2s;
            }
        }
    }

    #[test]
    fn test_two_sided_upper_clipped_to_estimate() {
        let sketch = populated_sketch();
        let mut scorer = ClassicalTwoSided::new(&sketch);
        let item = 42u64;
        let ceiling = sketch.estimate_count(item);
        let (_, upper) = scorer.predict_interval(item, 0.0, 1e6).unwrap();
        assert_eq!(upper, ceiling);
    }

    #[test]
    fn test_bayesian_one_sided_score_grid() {
        let sketch = populated_sketch();
        let model = StubModel {
            sketch: sketch.clone(),
            rule: AggregationRule::default(),
        };
        let mut scorer = BayesianOneSided::new(&model, &sketch);
        let item = 17u64;
        let truth = sketch.exact_count(item);
        let (score, _) = scorer.compute_score(item, truth).unwrap();
        assert!(score >= 0.0 && score <= 99.0);
        // Cached value is stable.
        let (again, _) = scorer.compute_score(item, truth).unwrap();
        assert_eq!(score, again);
        // An impossible-to-satisfy count falls back to the last grid index.
        let (fallback, _) = scorer.compute_score(item, 0).unwrap();
        assert!(fallback <= 99.0);
    }

    #[test]
    fn test_bayesian_one_sided_interval_clipped() {
        let sketch = populated_sketch();
        let model = StubModel {
            sketch: sketch.clone(),
            rule: AggregationRule::default(),
        };
        let mut scorer = BayesianOneSided::new(&model, &sketch);
        for item in [1u64, 17, 80] {
            let upper_bound = sketch.estimate_count(item);
            for tau in [0.0, 25.0, 60.0, 99.0] {
                let (lower, upper) = scorer.predict_interval(item, tau, 0.0).unwrap();
                assert!(lower <= upper);
                assert_eq!(upper, upper_bound);
            }
        }
    }

    #[test]
    fn test_bayesian_two_sided_scores_in_unit_interval() {
        let sketch = populated_sketch();
        let model = StubModel {
            sketch: sketch.clone(),
            rule: AggregationRule::default(),
        };
        let mut scorer = BayesianTwoSided::new(&model);
        let item = 17u64;
        for count in [0u64, 1, 5] {
            let (score, zero) = scorer.compute_score(item, count).unwrap();
            assert!(score > 0.0 && score <= 1.0);
            assert_eq!(zero, 0.0);
        }
        let (lower, upper) = scorer.predict_interval(item, 0.9, 0.0).unwrap();
        assert!(lower <= upper);
        assert!(upper <= sketch.estimate_count(item));
    }

    #[test]
    fn test_build_scorer_requires_model_for_bayesian() {
        let sketch = populated_sketch();
        let err = build_scorer(ScorerKind::Bayesian, false, &sketch, None, 0.9, 100, 1);
        assert!(matches!(err, Err(ConformalError::ModelNotFitted(_))));
        let ok = build_scorer(ScorerKind::Classical, false, &sketch, None, 0.9, 100, 1);
        assert_eq!(ok.unwrap().name(), "classical1s");
    }
}
