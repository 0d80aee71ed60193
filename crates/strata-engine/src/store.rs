//! Observation log and signature registry.
//!
//! Observations are append-only: nothing ever deletes one, membership moves
//! between modes instead. The registry interns structurally identical
//! signatures and keeps the per-signature fallback regressor.

use serde::{Deserialize, Serialize};

use strata_core::sig::SceneSig;
use strata_regress::Lwr;

/// One ingested data point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Index of the target object within the signature.
    pub target: usize,
    /// Full-layout input vector; length equals the signature dimension.
    pub x: Vec<f64>,
    /// Scalar outcome.
    pub y: f64,
    /// Interned signature index.
    pub sig_index: usize,
    /// Membership probability per mode, parallel to the mode registry
    /// (index 0 is the noise pseudo-mode).
    pub mode_prob: Vec<f64>,
    /// Current maximum-a-posteriori mode index.
    pub map_mode: usize,
    /// Row index within the MAP mode's model (meaningless while in noise).
    pub model_row: usize,
    /// Resolved object-to-slot mapping for the MAP mode: slot -> signature
    /// object index.
    pub obj_map: Vec<usize>,
}

/// One interned signature with its members and fallback regressor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigEntry {
    pub sig: SceneSig,
    /// Observation indices carrying this signature, in arrival order.
    pub members: Vec<usize>,
    /// Fallback local regressor; rebuilt by replay on restore, so it is
    /// not part of the snapshot.
    #[serde(skip, default = "default_lwr")]
    pub lwr: Lwr,
}

fn default_lwr() -> Lwr {
    Lwr::new(1)
}

/// Interning registry of signatures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SigRegistry {
    entries: Vec<SigEntry>,
}

impl SigRegistry {
    /// Find or create the entry structurally equal to `sig`.
    pub fn intern(&mut self, sig: &SceneSig, lwr_k: usize) -> usize {
        if let Some(i) = self.entries.iter().position(|e| e.sig == *sig) {
            return i;
        }
        self.entries.push(SigEntry {
            sig: sig.clone(),
            members: Vec::new(),
            lwr: Lwr::new(lwr_k),
        });
        self.entries.len() - 1
    }

    /// Index of the entry structurally equal to `sig`, if interned.
    pub fn find(&self, sig: &SceneSig) -> Option<usize> {
        self.entries.iter().position(|e| e.sig == *sig)
    }

    pub fn entry(&self, i: usize) -> &SigEntry {
        &self.entries[i]
    }

    pub fn entry_mut(&mut self, i: usize) -> &mut SigEntry {
        &mut self.entries[i]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SigEntry> {
        self.entries.iter()
    }
}
