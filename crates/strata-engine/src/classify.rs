//! Pairwise mode classifiers and mode voting.
//!
//! Prediction needs to decide which mode a new scene belongs to without an
//! outcome to score. The engine keeps one classifier per unordered mode
//! pair: relational clauses separating the two memberships, backed by
//! numeric discriminants over the raw inputs for whatever the clauses get
//! wrong. `classify` runs a round-robin vote over all candidate modes.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use strata_core::clause::{clause_matches, first_matching_clause, Clause, VarDomains};
use strata_core::relation::{Relation, RelationTable, Tuple};
use strata_core::sig::SceneSig;
use strata_core::traits::Discriminant;

use crate::engine::Engine;
use crate::score;

/// Which side of a pair an observation fell on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairVerdict {
    First,
    Second,
}

impl Default for PairVerdict {
    fn default() -> Self {
        Self::First
    }
}

/// Learned classifier for one unordered mode pair (first = lower index).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PairClassifier {
    /// Clauses matching the first mode's members.
    pub clauses: Vec<Clause>,
    /// One residual per clause (second-mode members the clause also
    /// matched), plus a trailing residual of unmatched first-mode members.
    pub residuals: Vec<Relation>,
    /// One numeric fallback per residual; `None` where the data was
    /// degenerate or the fallback failed validation.
    pub discriminants: Vec<Option<Discriminant>>,
    /// Verdict when nothing else applies: the larger membership.
    pub const_vote: PairVerdict,
}

/// Result of classifying one scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Winning logical mode (0 is noise).
    pub mode: usize,
    /// Slot resolution for the winning mode; empty for noise and constant
    /// modes.
    pub mapping: Vec<usize>,
}

/// Seed domains binding time and target for membership-clause testing.
fn member_seed(t: &Tuple) -> VarDomains {
    let mut seed = VarDomains::new();
    seed.insert(0, [t[0]].into());
    seed.insert(1, [t[1]].into());
    seed
}

impl Engine {
    /// Relearn every classifier a membership change invalidated, and the
    /// slot clauses of every changed mode.
    pub(crate) fn update_classifiers(&mut self) {
        let mut stale: Vec<usize> = Vec::new();
        if self.noise.classifier_stale {
            stale.push(0);
            self.noise.classifier_stale = false;
        }
        for (i, m) in self.modes.iter_mut().enumerate() {
            if m.classifier_stale {
                stale.push(i + 1);
                m.classifier_stale = false;
            }
        }
        if stale.is_empty() {
            return;
        }
        if self.use_foil {
            for &m in &stale {
                if m != 0 {
                    self.learn_obj_clauses(m);
                }
            }
        }
        for i in 0..self.nmodes() {
            for j in (i + 1)..self.nmodes() {
                if stale.contains(&i) || stale.contains(&j) {
                    self.update_pair(i, j);
                }
            }
        }
    }

    /// Relearn the per-slot disambiguation clauses of one mode: for each
    /// ambiguous slot, positives are the members' actual fillers and
    /// negatives every other compatible object in the same scene.
    fn learn_obj_clauses(&mut self, m: usize) {
        let slots = self.modes[m - 1].sig.len();
        let mut learned: Vec<Vec<Clause>> = vec![Vec::new(); slots];
        for s in 1..slots {
            let mut pos = Relation::new(3);
            let mut neg = Relation::new(3);
            let slot = self.modes[m - 1].sig[s].clone();
            for &obs in &self.modes[m - 1].members {
                let o = &self.data[obs];
                let sig = &self.sigs.entry(o.sig_index).sig;
                let filler = o.obj_map[s];
                let target_id = sig[o.target].id;
                pos.add(obs as i64, &[target_id, sig[filler].id]);
                for (j, e) in sig.entries().iter().enumerate() {
                    if j == filler || j == o.target {
                        continue;
                    }
                    if e.type_id == slot.type_id && e.props.len() == slot.props.len() {
                        neg.add(obs as i64, &[target_id, e.id]);
                    }
                }
            }
            if neg.is_empty() {
                // The slot was never ambiguous; no clause needed.
                continue;
            }
            let rules = self.inducer.induce(&pos, &neg, &self.rels);
            debug!(mode = m, slot = s, clauses = rules.clauses.len(), "learned slot clauses");
            learned[s] = rules.clauses;
        }
        self.modes[m - 1].obj_clauses = learned;
    }

    /// Relearn the classifier for one mode pair from current memberships.
    fn update_pair(&mut self, i: usize, j: usize) {
        let rel_i = if i == 0 {
            self.noise.member_rel.clone()
        } else {
            self.modes[i - 1].member_rel.clone()
        };
        let rel_j = if j == 0 {
            self.noise.member_rel.clone()
        } else {
            self.modes[j - 1].member_rel.clone()
        };

        let mut c = PairClassifier {
            const_vote: if rel_i.len() >= rel_j.len() {
                PairVerdict::First
            } else {
                PairVerdict::Second
            },
            ..PairClassifier::default()
        };
        if rel_i.is_empty() || rel_j.is_empty() {
            self.classifiers.insert((i, j), c);
            return;
        }

        if self.use_foil {
            let rules = self.inducer.induce(&rel_i, &rel_j, &self.rels);
            c.clauses = rules.clauses;
            c.residuals = rules.residuals;
        } else {
            // No clauses: a single residual hands everything to the
            // numeric fallback.
            c.residuals = vec![rel_i.clone()];
        }

        if self.use_lda {
            let mut discriminants = Vec::with_capacity(c.residuals.len());
            for (k, residual) in c.residuals.iter().enumerate() {
                let d = if k < c.clauses.len() {
                    // Clause k's false positives vs the members it was
                    // right about.
                    let clause = &c.clauses[k];
                    let mut covered = Relation::new(2);
                    for t in rel_i.iter() {
                        if clause_matches(clause, &self.rels, &member_seed(t)) {
                            covered.add(t[0], &t[1..]);
                        }
                    }
                    if residual.is_empty() {
                        None
                    } else {
                        self.learn_numeric(&covered, residual)
                    }
                } else {
                    // Trailing residual: members no clause matched, against
                    // the whole other side.
                    if residual.is_empty() && !c.clauses.is_empty() {
                        None
                    } else {
                        let pos = if c.clauses.is_empty() { &rel_i } else { residual };
                        self.learn_numeric(pos, &rel_j)
                    }
                };
                discriminants.push(d);
            }
            c.discriminants = discriminants;
        } else {
            c.discriminants = vec![None; c.residuals.len()];
        }
        debug!(
            i,
            j,
            clauses = c.clauses.len(),
            "updated pair classifier"
        );
        self.classifiers.insert((i, j), c);
    }

    /// Fit and validate a numeric discriminant between two member sets.
    /// Rows are the members' raw inputs; mixed input widths or a fallback
    /// that cannot beat the majority baseline on held-out rows yield
    /// `None`.
    fn learn_numeric(&mut self, pos: &Relation, neg: &Relation) -> Option<Discriminant> {
        use rand::seq::SliceRandom;

        let mut px: Vec<Vec<f64>> = pos
            .iter()
            .map(|t| self.data[t[0] as usize].x.clone())
            .collect();
        let mut nx: Vec<Vec<f64>> = neg
            .iter()
            .map(|t| self.data[t[0] as usize].x.clone())
            .collect();
        if px.is_empty() || nx.is_empty() {
            return None;
        }
        let width = px[0].len();
        if px.iter().chain(&nx).any(|r| r.len() != width) {
            return None;
        }

        px.shuffle(&mut self.rng);
        nx.shuffle(&mut self.rng);
        let ratio = self.config.discriminant_train_ratio;
        let ptrain = ((px.len() as f64 * ratio).round() as usize).clamp(1, px.len());
        let ntrain = ((nx.len() as f64 * ratio).round() as usize).clamp(1, nx.len());

        if ptrain == px.len() || ntrain == nx.len() {
            // Too little data to hold anything out; accept whatever fits.
            return self.disc_learner.fit(&px, &nx);
        }

        let d = self.disc_learner.fit(&px[..ptrain], &nx[..ntrain])?;
        let hp = &px[ptrain..];
        let hn = &nx[ntrain..];
        let correct = hp.iter().filter(|r| d.classify(r)).count()
            + hn.iter().filter(|r| !d.classify(r)).count();
        let majority = hp.len().max(hn.len());
        (correct > majority).then_some(d)
    }

    /// Decide which side of one pair a scene falls on.
    pub(crate) fn classify_pair(
        &self,
        i: usize,
        j: usize,
        target_id: i64,
        x: &[f64],
        rels: &RelationTable,
    ) -> PairVerdict {
        let Some(c) = self.classifiers.get(&(i, j)) else {
            return PairVerdict::First;
        };
        let mut seed = VarDomains::new();
        seed.insert(0, [0].into());
        seed.insert(1, [target_id].into());

        let disc_verdict = |d: &Option<Discriminant>| -> Option<PairVerdict> {
            match d {
                Some(d) if d.weights.len() == x.len() => Some(if d.classify(x) {
                    PairVerdict::First
                } else {
                    PairVerdict::Second
                }),
                _ => None,
            }
        };

        match first_matching_clause(&c.clauses, rels, &seed) {
            Some(k) => disc_verdict(c.discriminants.get(k).unwrap_or(&None))
                .unwrap_or(PairVerdict::First),
            // No clause matched: the trailing false-negative discriminant
            // decides if it exists, else the constant vote.
            None => disc_verdict(c.discriminants.last().unwrap_or(&None))
                .unwrap_or(c.const_vote),
        }
    }

    /// Classify a scene: candidates are noise plus every mode whose slots
    /// resolve against it, decided by a round-robin pairwise vote. Ties go
    /// to the lowest index.
    pub fn classify(
        &mut self,
        target: usize,
        sig: &SceneSig,
        rels: &RelationTable,
        x: &[f64],
    ) -> Classification {
        self.update_classifiers();

        let mut cands: Vec<(usize, Vec<usize>)> = vec![(0, Vec::new())];
        for m in 1..self.nmodes() {
            if let Some(mapping) = score::map_objs(&self.modes[m - 1], target, sig, rels) {
                cands.push((m, mapping));
            }
        }
        if cands.len() == 1 {
            return Classification {
                mode: 0,
                mapping: Vec::new(),
            };
        }

        let target_id = sig[target].id;
        let mut votes = vec![0usize; cands.len()];
        for a in 0..cands.len() {
            for b in (a + 1)..cands.len() {
                let (i, j) = (cands[a].0, cands[b].0);
                match self.classify_pair(i, j, target_id, x, rels) {
                    PairVerdict::First => votes[a] += 1,
                    PairVerdict::Second => votes[b] += 1,
                }
            }
        }
        let mut winner = 0;
        for (k, &v) in votes.iter().enumerate() {
            if v > votes[winner] {
                winner = k;
            }
        }
        trace!(mode = cands[winner].0, "classified scene");
        Classification {
            mode: cands[winner].0,
            mapping: cands[winner].1.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;
    use strata_core::clause::{Literal, Term};
    use strata_core::config::EngineConfig;

    fn engine() -> Engine {
        Engine::new(EngineConfig::default()).unwrap()
    }

    fn on_clause() -> Clause {
        Clause {
            literals: vec![Literal {
                relation: "on".to_string(),
                negated: false,
                args: smallvec![Term::Var(0), Term::Var(1)],
            }],
        }
    }

    fn frame_with_on(target_id: i64) -> RelationTable {
        let mut on = Relation::new(2);
        on.add(0, &[target_id]);
        let mut t = RelationTable::new();
        t.insert("on".to_string(), on);
        t
    }

    #[test]
    fn matching_clause_votes_first() {
        let mut e = engine();
        e.classifiers.insert(
            (0, 1),
            PairClassifier {
                clauses: vec![on_clause()],
                residuals: vec![Relation::new(2), Relation::new(2)],
                discriminants: vec![None, None],
                const_vote: PairVerdict::Second,
            },
        );
        let v = e.classify_pair(0, 1, 7, &[1.0], &frame_with_on(7));
        assert_eq!(v, PairVerdict::First);
    }

    #[test]
    fn unmatched_clauses_fall_back_to_const_vote() {
        let mut e = engine();
        // One unmatchable clause, no discriminants: only the constant vote
        // is left.
        e.classifiers.insert(
            (0, 1),
            PairClassifier {
                clauses: vec![on_clause()],
                residuals: vec![Relation::new(2), Relation::new(2)],
                discriminants: vec![None, None],
                const_vote: PairVerdict::First,
            },
        );
        let v = e.classify_pair(0, 1, 7, &[1.0], &RelationTable::new());
        assert_eq!(v, PairVerdict::First);
    }

    #[test]
    fn unmatched_clauses_use_trailing_discriminant() {
        let mut e = engine();
        // Discriminant votes First for positive inputs.
        let d = Discriminant {
            weights: vec![1.0],
            bias: 0.0,
        };
        e.classifiers.insert(
            (0, 1),
            PairClassifier {
                clauses: vec![on_clause()],
                residuals: vec![Relation::new(2), Relation::new(2)],
                discriminants: vec![None, Some(d)],
                const_vote: PairVerdict::First,
            },
        );
        let none = RelationTable::new();
        assert_eq!(e.classify_pair(0, 1, 7, &[5.0], &none), PairVerdict::First);
        assert_eq!(e.classify_pair(0, 1, 7, &[-5.0], &none), PairVerdict::Second);
    }

    #[test]
    fn clause_discriminant_overrides() {
        let mut e = engine();
        // Discriminant votes Second for negative inputs.
        let d = Discriminant {
            weights: vec![1.0],
            bias: 0.0,
        };
        e.classifiers.insert(
            (0, 1),
            PairClassifier {
                clauses: vec![on_clause()],
                residuals: vec![Relation::new(2), Relation::new(2)],
                discriminants: vec![Some(d), None],
                const_vote: PairVerdict::Second,
            },
        );
        let frame = frame_with_on(7);
        assert_eq!(e.classify_pair(0, 1, 7, &[5.0], &frame), PairVerdict::First);
        assert_eq!(e.classify_pair(0, 1, 7, &[-5.0], &frame), PairVerdict::Second);
    }

    #[test]
    fn no_clauses_falls_back_to_const_vote() {
        let mut e = engine();
        e.classifiers.insert(
            (0, 1),
            PairClassifier {
                const_vote: PairVerdict::Second,
                ..PairClassifier::default()
            },
        );
        let v = e.classify_pair(0, 1, 7, &[1.0], &RelationTable::new());
        assert_eq!(v, PairVerdict::Second);
    }

    #[test]
    fn width_mismatched_discriminant_is_skipped() {
        let mut e = engine();
        let d = Discriminant {
            weights: vec![1.0, 1.0],
            bias: 0.0,
        };
        e.classifiers.insert(
            (0, 1),
            PairClassifier {
                clauses: vec![on_clause()],
                residuals: vec![Relation::new(2), Relation::new(2)],
                discriminants: vec![Some(d), None],
                const_vote: PairVerdict::Second,
            },
        );
        // Input width 1 cannot be fed to a 2-weight discriminant; the
        // clause match alone decides.
        let v = e.classify_pair(0, 1, 7, &[-5.0], &frame_with_on(7));
        assert_eq!(v, PairVerdict::First);
    }
}
