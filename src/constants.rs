/// Capacity of the per-strategy memoization caches.
pub const CACHE_CAPACITY: usize = 2048;

/// Number of grid points used to discretize the confidence scale [0, 1].
pub const CONFIDENCE_GRID: usize = 100;

/// Default number of accepted Monte Carlo noise samples per item.
pub const N_MONTE_CARLO: usize = 1000;

/// Rejection sampling gives up after `MAX_REJECTION_FACTOR * n_mc` attempts.
pub const MAX_REJECTION_FACTOR: usize = 100;

/// Calibration bins are reduced until each bin can hold at least this many points.
pub const MIN_BIN_SIZE: usize = 100;

/// Smoothing mass added to the posterior histogram before interval construction.
pub const CHR_SMOOTHING: f64 = 0.01;

/// Numerical slack when comparing accumulated posterior mass to a grid level.
pub const GRID_EPSILON: f64 = 1e-6;
