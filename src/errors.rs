//! Errors
//!
//! Custom error types used throughout the `conformal-cms` crate.
use thiserror::Error;

/// Errors that can occur while sketching a stream or calibrating intervals.
#[derive(Debug, Error)]
pub enum ConformalError {
    /// The tracked calibration sample is empty.
    #[error("The tracked calibration sample is empty; increase the tracking budget or the stream length.")]
    EmptyCalibration,
    /// An operation that requires a fitted model was called before one was fit.
    #[error("No fitted model is available for {0}; a model must be fit first.")]
    ModelNotFitted(String),
    /// A model cannot be fit on a sketch that has seen no updates.
    #[error("Cannot fit a posterior model on an empty sketch.")]
    EmptySketch,
    /// Rejection sampling could not collect a single non-colliding draw.
    #[error("Collected {collected} of {requested} independent noise samples for item {item} before the retry cap.")]
    InsufficientNoiseSamples {
        item: u64,
        requested: usize,
        collected: usize,
    },
    /// Sketches with different dimensions or hash seeds cannot be merged.
    #[error("Cannot merge sketches with incompatible layouts, expected {expected} but {found} provided.")]
    IncompatibleSketch { expected: String, found: String },
    /// First value is the name of the parameter, second is expected, third is what was passed.
    #[error("Invalid parameter value passed for {0}, expected {1} but {2} provided.")]
    InvalidParameter(String, String, String),
    /// Unable to write configuration to file.
    #[error("Unable to write configuration to file: {0}")]
    UnableToWrite(String),
    /// Unable to read configuration from file.
    #[error("Unable to read configuration from a file {0}")]
    UnableToRead(String),
}
