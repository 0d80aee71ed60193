//! # strata-regress
//!
//! Numeric fitting for the mode-learning engine: plain and weighted
//! least squares over small in-memory matrices, the incremental
//! [`LinearModel`] owned by each learned mode, and [`Lwr`], the
//! per-signature locally weighted fallback regressor.

pub mod lwr;
pub mod model;
pub mod ols;

pub use lwr::Lwr;
pub use model::LinearModel;
