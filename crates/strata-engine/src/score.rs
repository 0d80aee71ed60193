//! Membership scoring and the prediction-time slot resolver.
//!
//! `calc_prob` answers "how well does this mode explain this observation",
//! maximizing the Gaussian residual likelihood over every type-compatible
//! object-to-slot assignment. `map_objs` answers the same slot-filling
//! question at prediction time, where there is no outcome to score against,
//! by falling back on the mode's learned relational clauses.

use statrs::distribution::{Continuous, Normal};
use tracing::trace;

use strata_core::clause::{clause_query, VarDomains};
use strata_core::config::EngineConfig;
use strata_core::relation::RelationTable;
use strata_core::sig::{ObjectSig, SceneSig};

use crate::assign::AssignmentIter;
use crate::mode::Mode;

/// Gaussian density, zero when the distribution is degenerate.
pub fn gauss_pdf(x: f64, mean: f64, var: f64) -> f64 {
    Normal::new(mean, var.sqrt()).map_or(0.0, |n| n.pdf(x))
}

/// An object can fill a slot when its type and block width agree.
fn slot_compatible(slot: &ObjectSig, obj: &ObjectSig) -> bool {
    slot.type_id == obj.type_id && slot.props.len() == obj.props.len()
}

/// Candidate scene-object indices per mode slot: the target alone for slot
/// 0, every other compatible object for the rest. `None` when the target
/// itself cannot fill slot 0.
fn slot_candidates(
    mode_sig: &SceneSig,
    target: usize,
    sig: &SceneSig,
) -> Option<Vec<Vec<usize>>> {
    let mut candidates = Vec::with_capacity(mode_sig.len());
    for (s, slot) in mode_sig.entries().iter().enumerate() {
        if s == 0 {
            if !slot_compatible(slot, &sig[target]) {
                return None;
            }
            candidates.push(vec![target]);
            continue;
        }
        let c: Vec<usize> = (0..sig.len())
            .filter(|&j| j != target && slot_compatible(slot, &sig[j]))
            .collect();
        candidates.push(c);
    }
    Some(candidates)
}

/// Restrict a full-layout input vector to one assignment's blocks.
pub fn restrict_input(x: &[f64], assignment: &[usize], sig: &SceneSig) -> Vec<f64> {
    let mut out = Vec::new();
    for &obj in assignment {
        let e = &sig[obj];
        out.extend_from_slice(&x[e.start..e.start + e.props.len()]);
    }
    out
}

/// Likelihood that `mode` generated `(x, y)`, maximized over assignments.
///
/// Returns the best likelihood and the assignment achieving it (empty for
/// a constant mode). `(0.0, [])` when no assignment is possible or the
/// model cannot predict.
pub fn calc_prob(
    mode: &Mode,
    nmodes: usize,
    config: &EngineConfig,
    target: usize,
    sig: &SceneSig,
    x: &[f64],
    y: f64,
) -> (f64, Vec<usize>) {
    let scale = (1.0 - config.epsilon) / nmodes as f64;

    if mode.model.is_const() {
        let p = mode
            .model
            .predict(&[])
            .map_or(0.0, |pred| scale * gauss_pdf(y, pred, config.measure_var));
        return (p, Vec::new());
    }

    let Some(candidates) = slot_candidates(&mode.sig, target, sig) else {
        return (0.0, Vec::new());
    };

    let mut best = (0.0, Vec::new());
    for assignment in AssignmentIter::new(candidates) {
        let xc = restrict_input(x, &assignment, sig);
        let Some(pred) = mode.model.predict(&xc) else {
            continue;
        };
        let p = scale * gauss_pdf(y, pred, config.measure_var);
        if p > best.0 {
            best = (p, assignment);
        }
    }
    trace!(prob = best.0, "scored observation against mode");
    best
}

/// Resolve the mode's slots against a scene without an outcome to score.
///
/// Unambiguous slots (a single compatible candidate, or no learned clauses)
/// take the lowest-index candidate. Ambiguous slots are put to the mode's
/// clauses in order; the first clause whose query narrows the candidates to
/// exactly one object wins. `None` when any slot cannot be resolved.
pub fn map_objs(
    mode: &Mode,
    target: usize,
    sig: &SceneSig,
    rels: &RelationTable,
) -> Option<Vec<usize>> {
    if mode.model.is_const() {
        return Some(Vec::new());
    }
    let candidates = slot_candidates(&mode.sig, target, sig)?;

    let mut mapping: Vec<usize> = Vec::with_capacity(candidates.len());
    for (s, cands) in candidates.iter().enumerate() {
        let free: Vec<usize> = cands
            .iter()
            .copied()
            .filter(|c| !mapping.contains(c))
            .collect();
        match free.as_slice() {
            [] => return None,
            [only] => {
                mapping.push(*only);
                continue;
            }
            _ => {}
        }

        let clauses = mode.obj_clauses.get(s).map_or(&[][..], Vec::as_slice);
        if clauses.is_empty() {
            mapping.push(free[0]);
            continue;
        }

        let mut seed = VarDomains::new();
        seed.insert(0, [0].into());
        seed.insert(1, [sig[target].id].into());
        seed.insert(2, free.iter().map(|&c| sig[c].id).collect());

        let mut resolved = None;
        for clause in clauses {
            let vals = clause_query(clause, rels, &seed, 2);
            if vals.len() == 1 {
                if let Some(&id) = vals.iter().next() {
                    resolved = free.iter().copied().find(|&c| sig[c].id == id);
                }
                break;
            }
        }
        mapping.push(resolved?);
    }
    Some(mapping)
}
