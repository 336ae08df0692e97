//! Configuration
//!
//! The configuration surface consumed by the orchestrator, abstracted from
//! any CLI. Serializable so experiment settings can be stored alongside
//! their results.
use crate::constants::N_MONTE_CARLO;
use crate::errors::ConformalError;
use crate::model::AggregationRule;
use crate::scoring::ScorerKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Posterior model variant fit by the orchestrator.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ModelKind {
    /// Fit from the sketch alone.
    #[default]
    BayesianDp,
    /// Fit from the sketch plus the raw warm-up sample.
    SmoothedNgg,
}

fn default_n_mc() -> usize {
    N_MONTE_CARLO
}
fn default_unique() -> usize {
    1
}

/// Settings for one conformal sketching run.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ConformalConfig {
    /// Number of hash rows in the sketch.
    pub depth: usize,
    /// Buckets per hash row.
    pub width: usize,
    /// Warm-up tracking budget: number of stream draws whose items are
    /// registered for calibration.
    pub n_track: usize,
    /// Requested number of calibration bins over observed counts.
    pub n_bins: usize,
    /// Per-item calibration uniqueness cap; values above 1 enable the K-fold
    /// subsampling path.
    #[serde(default = "default_unique")]
    pub unique: usize,
    /// Target coverage level, e.g. 0.9.
    pub confidence: f64,
    pub two_sided: bool,
    pub seed: u64,
    /// Accepted Monte Carlo samples per item for the bootstrap strategies.
    #[serde(default = "default_n_mc")]
    pub n_mc: usize,
    pub scorer: ScorerKind,
    pub model: ModelKind,
    pub agg_rule: AggregationRule,
}

impl Default for ConformalConfig {
    fn default() -> Self {
        ConformalConfig {
            depth: 3,
            width: 1000,
            n_track: 1000,
            n_bins: 1,
            unique: 1,
            confidence: 0.9,
            two_sided: false,
            seed: 2021,
            n_mc: N_MONTE_CARLO,
            scorer: ScorerKind::default(),
            model: ModelKind::default(),
            agg_rule: AggregationRule::default(),
        }
    }
}

impl ConformalConfig {
    pub fn set_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }
    pub fn set_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }
    pub fn set_n_track(mut self, n_track: usize) -> Self {
        self.n_track = n_track;
        self
    }
    pub fn set_n_bins(mut self, n_bins: usize) -> Self {
        self.n_bins = n_bins;
        self
    }
    pub fn set_unique(mut self, unique: usize) -> Self {
        self.unique = unique;
        self
    }
    pub fn set_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
    pub fn set_two_sided(mut self, two_sided: bool) -> Self {
        self.two_sided = two_sided;
        self
    }
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
    pub fn set_n_mc(mut self, n_mc: usize) -> Self {
        self.n_mc = n_mc;
        self
    }
    pub fn set_scorer(mut self, scorer: ScorerKind) -> Self {
        self.scorer = scorer;
        self
    }
    pub fn set_model(mut self, model: ModelKind) -> Self {
        self.model = model;
        self
    }
    pub fn set_agg_rule(mut self, agg_rule: AggregationRule) -> Self {
        self.agg_rule = agg_rule;
        self
    }

    pub fn validate(&self) -> Result<(), ConformalError> {
        if self.depth == 0 {
            return Err(ConformalError::InvalidParameter(
                "depth".to_string(),
                "a positive row count".to_string(),
                "0".to_string(),
            ));
        }
        if self.width == 0 {
            return Err(ConformalError::InvalidParameter(
                "width".to_string(),
                "a positive bucket count".to_string(),
                "0".to_string(),
            ));
        }
        if self.n_track == 0 {
            return Err(ConformalError::InvalidParameter(
                "n_track".to_string(),
                "a positive tracking budget".to_string(),
                "0".to_string(),
            ));
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(ConformalError::InvalidParameter(
                "confidence".to_string(),
                "a value in (0, 1)".to_string(),
                self.confidence.to_string(),
            ));
        }
        if self.n_mc == 0 {
            return Err(ConformalError::InvalidParameter(
                "n_mc".to_string(),
                "a positive Monte Carlo sample count".to_string(),
                "0".to_string(),
            ));
        }
        Ok(())
    }

    /// Save the configuration as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConformalError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConformalError::UnableToWrite(e.to_string()))?;
        fs::write(path, json).map_err(|e| ConformalError::UnableToWrite(e.to_string()))
    }

    /// Load a configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConformalError> {
        let json =
            fs::read_to_string(path).map_err(|e| ConformalError::UnableToRead(e.to_string()))?;
        serde_json::from_str(&json).map_err(|e| ConformalError::UnableToRead(e.to_string()))
    }
}
