//! # strata-core
//!
//! Foundation crate for the Strata mode-learning engine.
//! Defines signatures, the relation table, config, errors, constants, and
//! the trait seams for the opaque rule-induction and discriminant services.
//! Every other crate in the workspace depends on this.

pub mod clause;
pub mod config;
pub mod constants;
pub mod errors;
pub mod relation;
pub mod sig;
pub mod traits;

// Re-export the most commonly used types at the crate root.
pub use clause::{Clause, Literal, Term, VarDomains};
pub use config::EngineConfig;
pub use errors::{StrataError, StrataResult};
pub use relation::{Relation, RelationTable, Tuple};
pub use sig::{ObjectSig, SceneSig};
pub use traits::{Discriminant, DiscriminantLearner, InducedRules, RuleInducer};
