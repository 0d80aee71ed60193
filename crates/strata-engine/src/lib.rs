//! # strata-engine
//!
//! The mode-learning engine: an online, incremental learner of piecewise
//! linear predictive models over relationally structured observations.
//!
//! ## Shape
//!
//! - [`store`]: append-only observation log and the signature registry.
//! - [`mode`]: the noise pseudo-mode, learned modes, and registry
//!   compaction.
//! - [`assign`]: lazy enumeration of object-to-slot assignments.
//! - [`score`]: membership scoring and the prediction-time slot resolver.
//! - [`em`]: the expectation/maximization refinement loop.
//! - [`discovery`]: robust linear-subset search and unify-or-create.
//! - [`classify`]: pairwise classifiers and mode voting.
//! - [`persist`]: whole-state snapshot and restore.
//! - [`engine`]: the facade the host calls once per cycle.
//!
//! One `Engine` instance owns all mutable state; every call runs to
//! completion on the caller's thread.

pub mod assign;
pub mod classify;
pub mod discovery;
pub mod em;
pub mod engine;
pub mod mode;
pub mod persist;
pub mod score;
pub mod store;

pub use classify::{Classification, PairClassifier, PairVerdict};
pub use engine::{Engine, Prediction};
pub use mode::Mode;
pub use store::Observation;
