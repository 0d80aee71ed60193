//! Trait seams for the opaque learning services.
//!
//! Rule induction and discriminant fitting are consumed as services: the
//! engine depends on these traits only, never on a concrete algorithm.

use serde::{Deserialize, Serialize};

use crate::clause::Clause;
use crate::relation::{Relation, RelationTable};

/// Output of one induction run.
#[derive(Debug, Clone, Default)]
pub struct InducedRules {
    /// Learned clauses, in application order.
    pub clauses: Vec<Clause>,
    /// One residual per clause (negatives the clause wrongly matched),
    /// plus one trailing residual of positives no clause matched.
    pub residuals: Vec<Relation>,
}

/// Learns clauses separating positive tuples from negative tuples given
/// the accumulated background relations.
pub trait RuleInducer {
    fn induce(&self, pos: &Relation, neg: &Relation, background: &RelationTable) -> InducedRules;
}

/// A fitted two-class numeric discriminant. `true` means the positive side.
///
/// Concrete so it can be serialized with the rest of the learned state;
/// how it was fitted stays behind [`DiscriminantLearner`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discriminant {
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl Discriminant {
    pub fn classify(&self, x: &[f64]) -> bool {
        assert_eq!(x.len(), self.weights.len(), "discriminant dimension mismatch");
        let score: f64 = self.weights.iter().zip(x).map(|(w, v)| w * v).sum();
        score + self.bias > 0.0
    }
}

/// Fits a [`Discriminant`] from positive and negative rows. Returns `None`
/// when the data is degenerate (too few rows, zero variance).
pub trait DiscriminantLearner {
    fn fit(&self, pos: &[Vec<f64>], neg: &[Vec<f64>]) -> Option<Discriminant>;
}
