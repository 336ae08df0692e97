//! Conformalized count-min sketching.
//!
//! A count-min sketch answers frequency queries over a stream in fixed
//! memory, but its point estimates are biased high by hash collisions. This
//! crate wraps the sketch in a conformal calibration layer: a tracked
//! warm-up sample is scored by a pluggable conformity rule, the scores are
//! calibrated into thresholds with a finite-sample coverage correction, and
//! every subsequent query returns an interval instead of a point estimate.
mod cache;
mod chr;
mod constants;

// Modules
pub mod bootstrap;
pub mod calibration;
pub mod config;
pub mod conformal;
pub mod errors;
pub mod model;
pub mod scoring;
pub mod sketch;
pub mod stream;
pub mod utils;

// Individual classes, and functions
pub use config::{ConformalConfig, ModelKind};
pub use conformal::{ConformalCms, ResultRecord};
pub use errors::ConformalError;
pub use model::{AggregationRule, BayesianDp, PosteriorModel, SmoothedNgg};
pub use scoring::{ScorerKind, ScoringStrategy};
pub use sketch::CountMinSketch;
pub use stream::{PitmanYorStream, Stream};
