//! Workspace-wide constants and config defaults.

/// Strata system version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Likelihood assigned to the noise pseudo-mode for any observation.
pub const DEFAULT_NOISE_PROB: f64 = 1e-9;

/// Fixed measurement variance for the Gaussian residual likelihood.
pub const DEFAULT_MEASURE_VAR: f64 = 1e-4;

/// Normalization slack applied to learned-mode likelihoods.
pub const DEFAULT_EPSILON: f64 = 1e-3;

/// Absolute residual below which a point counts as fitting a model.
pub const DEFAULT_ERROR_THRESH: f64 = 1e-3;

/// Minimum subset size before a candidate relationship becomes a mode.
pub const DEFAULT_NEW_MODE_THRESH: usize = 20;

/// A unified model may be this many times worse than the mode it absorbs.
pub const DEFAULT_UNIFY_MUL_THRESH: f64 = 10.0;

/// Rounds of reweighted refitting inside one robust-subset attempt.
pub const DEFAULT_MINI_EM_MAX_ITERS: usize = 10;

/// Random restarts of the robust linear-subset search.
pub const DEFAULT_SUBSET_MAX_ROUNDS: usize = 20;

/// Per-point residual progress below which reweighting has converged.
pub const DEFAULT_CONVERGENCE_THRESH: f64 = 1e-10;

/// Weight ceiling for the inverse-power residual kernel.
pub const DEFAULT_MAX_KERNEL_WEIGHT: f64 = 1e9;

/// Exponent of the inverse-power residual kernel.
pub const DEFAULT_KERNEL_POW: f64 = -3.0;

/// Neighbors consulted by the per-signature fallback regressor.
pub const DEFAULT_LWR_K: usize = 10;

/// Fraction of each class used to train a candidate discriminant;
/// the remainder is held out to beat the majority baseline.
pub const DEFAULT_DISCRIMINANT_TRAIN_RATIO: f64 = 0.8;

/// Default RNG seed; discovery sampling is reproducible given a seed.
pub const DEFAULT_RNG_SEED: u64 = 0x5752_4174;
