//! The noise pseudo-mode and learned modes.
//!
//! Mode index 0 is the noise pseudo-mode: unexplained observations bucketed
//! by signature, each bucket with an order statistic over outcomes and a
//! discovery watermark. Learned modes own a linear model, a restricted
//! signature, a membership set, per-slot clauses, and staleness tracking.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use strata_core::clause::Clause;
use strata_core::relation::Relation;
use strata_core::sig::SceneSig;
use strata_regress::LinearModel;

/// Total order over outcome values for the noise order statistic.
/// Outcomes are asserted finite on ingestion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrdF64(pub f64);

impl Eq for OrdF64 {}

impl PartialOrd for OrdF64 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdF64 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// One signature's share of the noise pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoiseBucket {
    /// Unexplained observations with this signature.
    pub members: BTreeSet<usize>,
    /// Discovery watermark: skip discovery until the bucket reaches this
    /// size. Zero means the bucket has never been examined.
    pub check_after: usize,
    /// Outcome order statistic: identical outcomes grouped. Rebuilt from
    /// `members` on restore.
    #[serde(skip)]
    pub sorted_ys: BTreeMap<OrdF64, BTreeSet<usize>>,
}

impl NoiseBucket {
    pub fn insert(&mut self, obs: usize, y: f64) {
        self.members.insert(obs);
        self.sorted_ys.entry(OrdF64(y)).or_default().insert(obs);
    }

    pub fn remove(&mut self, obs: usize, y: f64) {
        self.members.remove(&obs);
        if let Some(group) = self.sorted_ys.get_mut(&OrdF64(y)) {
            group.remove(&obs);
            if group.is_empty() {
                self.sorted_ys.remove(&OrdF64(y));
            }
        }
    }
}

/// The noise pseudo-mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseMode {
    /// Buckets keyed by interned signature index.
    pub buckets: BTreeMap<usize, NoiseBucket>,
    /// Membership relation (observation, target id) for classifier
    /// training against learned modes.
    pub member_rel: Relation,
    /// Pairwise classifiers involving the noise mode need relearning.
    pub classifier_stale: bool,
}

impl Default for NoiseMode {
    fn default() -> Self {
        Self {
            buckets: BTreeMap::new(),
            member_rel: Relation::new(2),
            classifier_stale: false,
        }
    }
}

impl NoiseMode {
    pub fn member_count(&self) -> usize {
        self.buckets.values().map(|b| b.members.len()).sum()
    }

    pub fn contains(&self, obs: usize) -> bool {
        self.buckets.values().any(|b| b.members.contains(&obs))
    }
}

/// One learned mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mode {
    /// The linear predictive model, over the restricted layout.
    pub model: LinearModel,
    /// Slot signature: the objects the model actually uses, target first.
    pub sig: SceneSig,
    /// Member observation indices.
    pub members: BTreeSet<usize>,
    /// Model row -> owning observation; kept dense by swap-remove.
    pub row_owner: Vec<usize>,
    /// Per-slot relational clauses for ambiguous slot resolution.
    pub obj_clauses: Vec<Vec<Clause>>,
    /// Model needs a refit.
    pub stale: bool,
    /// Pairwise classifiers involving this mode need relearning.
    pub classifier_stale: bool,
    /// Observations whose membership probability for this mode must be
    /// recomputed.
    pub stale_obs: BTreeSet<usize>,
    /// Membership relation (observation, target id).
    pub member_rel: Relation,
}

impl Default for Mode {
    fn default() -> Self {
        Self {
            model: LinearModel::new(),
            sig: SceneSig::new(),
            members: BTreeSet::new(),
            row_owner: Vec::new(),
            obj_clauses: Vec::new(),
            stale: false,
            classifier_stale: true,
            stale_obs: BTreeSet::new(),
            member_rel: Relation::new(2),
        }
    }
}
