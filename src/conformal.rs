//! Stream orchestrator
//!
//! Drives the two-phase ingestion protocol and the calibration pipeline:
//! warm-up tracking into a frozen snapshot sketch, main stream consumption
//! into the live sketch, model fitting, conformity scoring of the tracked
//! sample, threshold calibration, sketch merging, and evaluation of held-out
//! queries into a result table.
//!
//! Everything is single-threaded and synchronous; the only shared-resource
//! rule is that scoring strategies snapshot the sketch at construction time,
//! so the live sketch may keep moving without corrupting their caches.
use crate::cache::BoundedCache;
use crate::calibration::{calibrate, subsample_unique, CalibrationThresholds};
use crate::config::{ConformalConfig, ModelKind};
use crate::constants::CACHE_CAPACITY;
use crate::errors::ConformalError;
use crate::model::{AggregationRule, BayesianDp, PosteriorModel, SmoothedNgg};
use crate::scoring::{build_scorer, ScorerKind};
use crate::sketch::CountMinSketch;
use crate::stream::Stream;
use hashbrown::HashMap;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// One evaluated test query.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ResultRecord {
    /// Method label, e.g. `conformal-bayes1s`.
    pub method: String,
    pub item: u64,
    /// True count over the full stream, from the audit map.
    pub count: u64,
    pub lower: u64,
    pub upper: u64,
    /// Point estimate collapsed from the interval.
    pub estimate: f64,
    /// Whether the item was registered during the warm-up phase.
    pub seen: bool,
}

/// Conformalized count-min sketch over a stream collaborator.
pub struct ConformalCms<S: Stream> {
    cfg: ConformalConfig,
    stream: S,
    rng: StdRng,
    sketch: CountMinSketch,
    warmup_sketch: Option<CountMinSketch>,
    /// Tracked frequency per registered item, counted during the main phase.
    freq_track: HashMap<u64, u64>,
    /// Occurrences per registered item during the warm-up phase.
    data_track: HashMap<u64, u64>,
    /// Raw warm-up draws, side data for the NGG model variant.
    warmup_sample: Vec<u64>,
    model: Option<Box<dyn PosteriorModel>>,
    thresholds: Option<CalibrationThresholds>,
    interval_cache: BoundedCache<(&'static str, u64, u64, u64), (u64, u64)>,
    merged: bool,
}

impl<S: Stream> ConformalCms<S> {
    pub fn new(cfg: ConformalConfig, stream: S) -> Result<Self, ConformalError> {
        cfg.validate()?;
        let rng = StdRng::seed_from_u64(cfg.seed);
        let sketch = CountMinSketch::new(cfg.depth, cfg.width, cfg.seed);
        Ok(ConformalCms {
            cfg,
            stream,
            rng,
            sketch,
            warmup_sketch: None,
            freq_track: HashMap::new(),
            data_track: HashMap::new(),
            warmup_sample: Vec::new(),
            model: None,
            thresholds: None,
            interval_cache: BoundedCache::new(CACHE_CAPACITY),
            merged: false,
        })
    }

    /// Thresholds from the most recent `run`, if any.
    pub fn thresholds(&self) -> Option<&CalibrationThresholds> {
        self.thresholds.as_ref()
    }

    /// The live sketch (merged with the warm-up snapshot after a `run`).
    pub fn sketch(&self) -> &CountMinSketch {
        &self.sketch
    }

    /// Draw the tracking budget from the stream, registering every item for
    /// calibration and ingesting it into a dedicated warm-up sketch. Resets
    /// any previous tracking state.
    pub fn warmup(&mut self) {
        info!("Warm-up iterations (tracking budget: {})...", self.cfg.n_track);
        self.sketch = CountMinSketch::new(self.cfg.depth, self.cfg.width, self.cfg.seed);
        let mut warmup_sketch = self.sketch.clone();
        self.freq_track.clear();
        self.data_track.clear();
        self.warmup_sample.clear();
        self.thresholds = None;
        self.interval_cache.invalidate();
        self.merged = false;
        for _ in 0..self.cfg.n_track {
            let x = self.stream.sample(&mut self.rng);
            warmup_sketch.update(x);
            // Tracked frequency counts main-phase occurrences only.
            self.freq_track.insert(x, 0);
            *self.data_track.entry(x).or_insert(0) += 1;
            self.warmup_sample.push(x);
        }
        self.warmup_sketch = Some(warmup_sketch);
    }

    /// Consume the remainder of the stream budget into the live sketch,
    /// bumping the tracked frequency of registered items.
    pub fn consume_stream(&mut self, n: usize) {
        let n_main = n.saturating_sub(self.cfg.n_track);
        info!("Main iterations: {}...", n_main);
        for _ in 0..n_main {
            let x = self.stream.sample(&mut self.rng);
            self.sketch.update(x);
            if let Some(freq) = self.freq_track.get_mut(&x) {
                *freq += 1;
            }
        }
    }

    /// Build the configured model variant against the live sketch and fit it.
    pub fn create_and_fit_model(&mut self) -> Result<(), ConformalError> {
        let mut model: Box<dyn PosteriorModel> = match self.cfg.model {
            ModelKind::BayesianDp => Box::new(BayesianDp::new(&self.sketch, self.cfg.agg_rule)),
            ModelKind::SmoothedNgg => Box::new(SmoothedNgg::new(
                &self.sketch,
                &self.warmup_sample,
                self.cfg.agg_rule,
            )),
        };
        model.empirical_bayes()?;
        self.model = Some(model);
        Ok(())
    }

    /// Swap the fitted model's aggregation rule in place and drop every
    /// cached prediction interval. Fails before any model has been fit.
    pub fn change_rule(&mut self, rule: AggregationRule) -> Result<(), ConformalError> {
        let model = self
            .model
            .as_mut()
            .ok_or_else(|| ConformalError::ModelNotFitted("change_rule".to_string()))?;
        model.set_aggregation(rule);
        self.cfg.agg_rule = rule;
        self.interval_cache.invalidate();
        Ok(())
    }

    /// Execute the full pipeline: warm-up, main consumption, model fitting,
    /// calibration, warm-up merge, and evaluation of `n_test` fresh draws.
    ///
    /// * `n` - Total stream budget including the tracking budget.
    /// * `n_test` - Held-out queries to evaluate.
    /// * `reuse_stream` - Skip ingestion and reuse the tracked state of a
    ///   previous run, so scoring rules can be compared on one frozen stream.
    /// * `reuse_model` - Keep a previously fitted model.
    pub fn run(
        &mut self,
        n: usize,
        n_test: usize,
        reuse_stream: bool,
        reuse_model: bool,
    ) -> Result<Vec<ResultRecord>, ConformalError> {
        if n < self.cfg.n_track {
            return Err(ConformalError::InvalidParameter(
                "n".to_string(),
                format!("at least the tracking budget ({})", self.cfg.n_track),
                n.to_string(),
            ));
        }
        info!("Running conformal method with n = {}...", n);

        if !reuse_stream || self.warmup_sketch.is_none() {
            self.warmup();
            self.consume_stream(n);
        }
        if self.freq_track.is_empty() {
            return Err(ConformalError::EmptyCalibration);
        }

        let needs_model = self.cfg.scorer == ScorerKind::Bayesian;
        if needs_model && (!reuse_model || self.model.is_none()) {
            self.create_and_fit_model()?;
        }

        let scorer_seed = self.rng.gen::<u64>();
        let model_ref: Option<&dyn PosteriorModel> = self.model.as_deref();
        let mut scorer = build_scorer(
            self.cfg.scorer,
            self.cfg.two_sided,
            &self.sketch,
            model_ref,
            self.cfg.confidence,
            self.cfg.n_mc,
            scorer_seed,
        )?;

        // Score the tracked calibration sample, one entry per warm-up
        // occurrence, in deterministic item order.
        let mut tracked: Vec<u64> = self.freq_track.keys().copied().collect();
        tracked.sort_unstable();
        let mut cal_items: Vec<u64> = Vec::new();
        let mut cal_scores: Vec<(f64, f64)> = Vec::new();
        let mut cal_counts: Vec<f64> = Vec::new();
        for &x in &tracked {
            let freq = self.freq_track.get(&x).copied().unwrap_or(0);
            let occurrences = self.data_track.get(&x).copied().unwrap_or(0);
            let score = scorer.compute_score(x, freq)?;
            for _ in 0..occurrences {
                cal_items.push(x);
                cal_scores.push(score);
                cal_counts.push(freq as f64);
            }
        }
        let (cal_scores, cal_counts) = if self.cfg.unique > 1 {
            subsample_unique(
                &cal_items,
                &cal_scores,
                &cal_counts,
                self.cfg.unique,
                &mut self.rng,
            )
        } else {
            (cal_scores, cal_counts)
        };
        let thresholds = calibrate(
            &cal_scores,
            &cal_counts,
            self.cfg.n_bins,
            self.cfg.confidence,
            self.cfg.two_sided,
        )?;

        // Fold the warm-up snapshot into the live sketch so evaluation sees
        // the full stream. The scorer keeps its pre-merge snapshot; the
        // warm-up contribution is added back onto both bounds below.
        if !self.merged {
            if let Some(warmup) = &self.warmup_sketch {
                self.sketch.merge(warmup)?;
            }
            self.merged = true;
        }

        info!("Evaluating on {} test draws...", n_test);
        let mut results = Vec::with_capacity(n_test);
        for _ in 0..n_test {
            let x = self.stream.sample(&mut self.rng);
            let count = self.sketch.exact_count(x);
            let warmup_count = self
                .warmup_sketch
                .as_ref()
                .map_or(0, |w| w.exact_count(x));
            let key = (
                scorer.name(),
                x,
                thresholds.low.to_bits(),
                thresholds.upp.to_bits(),
            );
            let (lower, upper) = match self.interval_cache.get(&key) {
                Some(&interval) => interval,
                None => {
                    let (lo, up) = scorer.predict_interval(x, thresholds.low, thresholds.upp)?;
                    let interval = (lo + warmup_count, up + warmup_count);
                    self.interval_cache.insert(key, interval);
                    interval
                }
            };
            let estimate = if self.cfg.confidence == 0.5 {
                lower as f64
            } else {
                (lower + upper) as f64 / 2.0
            };
            results.push(ResultRecord {
                method: format!("conformal-{}", scorer.name()),
                item: x,
                count,
                lower,
                upper,
                estimate,
                seen: self.freq_track.contains_key(&x),
            });
        }
        results.sort_by(|a, b| b.count.cmp(&a.count).then(a.item.cmp(&b.item)));
        self.thresholds = Some(thresholds);
        Ok(results)
    }
}
