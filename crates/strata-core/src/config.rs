//! Engine configuration.
//!
//! One immutable value threaded through every component; no ambient
//! tunables. Loadable from TOML, all fields defaulted.

use serde::{Deserialize, Serialize};

use crate::constants as defaults;
use crate::errors::{StrataError, StrataResult};

/// All tunable thresholds for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed membership likelihood of the noise pseudo-mode.
    pub noise_prob: f64,
    /// Variance of the Gaussian residual likelihood.
    pub measure_var: f64,
    /// Normalization slack on learned-mode likelihoods.
    pub epsilon: f64,
    /// Absolute residual threshold for "fits the model".
    pub error_thresh: f64,
    /// Minimum seed-subset size for creating a mode.
    pub new_mode_thresh: usize,
    /// Multiplier bound for accepting a unification refit.
    pub unify_mul_thresh: f64,
    /// Reweighting rounds inside one robust-subset attempt.
    pub mini_em_max_iters: usize,
    /// Random restarts of the robust-subset search.
    pub subset_max_rounds: usize,
    /// Per-point residual progress convergence bound.
    pub convergence_thresh: f64,
    /// Cap on inverse-power residual kernel weights.
    pub max_kernel_weight: f64,
    /// Exponent of the residual kernel.
    pub kernel_pow: f64,
    /// Neighbors used by the fallback local regressor.
    pub lwr_k: usize,
    /// Train fraction for candidate discriminants.
    pub discriminant_train_ratio: f64,
    /// Seed for the engine RNG.
    pub rng_seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            noise_prob: defaults::DEFAULT_NOISE_PROB,
            measure_var: defaults::DEFAULT_MEASURE_VAR,
            epsilon: defaults::DEFAULT_EPSILON,
            error_thresh: defaults::DEFAULT_ERROR_THRESH,
            new_mode_thresh: defaults::DEFAULT_NEW_MODE_THRESH,
            unify_mul_thresh: defaults::DEFAULT_UNIFY_MUL_THRESH,
            mini_em_max_iters: defaults::DEFAULT_MINI_EM_MAX_ITERS,
            subset_max_rounds: defaults::DEFAULT_SUBSET_MAX_ROUNDS,
            convergence_thresh: defaults::DEFAULT_CONVERGENCE_THRESH,
            max_kernel_weight: defaults::DEFAULT_MAX_KERNEL_WEIGHT,
            kernel_pow: defaults::DEFAULT_KERNEL_POW,
            lwr_k: defaults::DEFAULT_LWR_K,
            discriminant_train_ratio: defaults::DEFAULT_DISCRIMINANT_TRAIN_RATIO,
            rng_seed: defaults::DEFAULT_RNG_SEED,
        }
    }
}

impl EngineConfig {
    /// Parse a config from a TOML string. Missing fields take defaults.
    pub fn from_toml_str(s: &str) -> StrataResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| StrataError::Config {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs that would make the engine degenerate.
    pub fn validate(&self) -> StrataResult<()> {
        if self.noise_prob <= 0.0 {
            return Err(StrataError::Config {
                reason: "noise_prob must be positive".into(),
            });
        }
        if self.measure_var <= 0.0 {
            return Err(StrataError::Config {
                reason: "measure_var must be positive".into(),
            });
        }
        if self.error_thresh <= 0.0 {
            return Err(StrataError::Config {
                reason: "error_thresh must be positive".into(),
            });
        }
        if self.new_mode_thresh < 3 {
            return Err(StrataError::Config {
                reason: "new_mode_thresh must be at least 3".into(),
            });
        }
        if !(0.0..1.0).contains(&self.discriminant_train_ratio) {
            return Err(StrataError::Config {
                reason: "discriminant_train_ratio must be in [0, 1)".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = EngineConfig::from_toml_str("new_mode_thresh = 30").unwrap();
        assert_eq!(config.new_mode_thresh, 30);
        assert_eq!(config.lwr_k, EngineConfig::default().lwr_k);
    }

    #[test]
    fn rejects_degenerate_threshold() {
        assert!(EngineConfig::from_toml_str("error_thresh = 0.0").is_err());
        assert!(EngineConfig::from_toml_str("new_mode_thresh = 2").is_err());
    }
}
