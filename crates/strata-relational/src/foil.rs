//! Greedy FOIL-style clause induction.
//!
//! Separates positive example tuples from negative ones by growing clauses
//! one literal at a time, maximizing information gain against the
//! background relation table. Candidate literals bind only the example
//! variables (tuple positions), which keeps the search deterministic and
//! small; that is enough expressiveness for slot disambiguation and mode
//! membership, the two places the engine asks for rules.

use std::collections::BTreeSet;

use smallvec::SmallVec;
use tracing::debug;

use strata_core::clause::{clause_matches, Clause, Literal, Term, VarDomains};
use strata_core::relation::{Relation, RelationTable, Tuple};
use strata_core::traits::{InducedRules, RuleInducer};

/// Cap on learned clauses per induction run.
const MAX_CLAUSES: usize = 5;

/// Cap on literals per clause.
const MAX_LITERALS: usize = 4;

/// Greedy FOIL-style inducer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Foil;

impl Foil {
    pub fn new() -> Self {
        Self
    }
}

/// Seed domains binding each tuple position to its value.
fn tuple_domains(t: &Tuple) -> VarDomains {
    t.iter()
        .enumerate()
        .map(|(i, &v)| (i, BTreeSet::from([v])))
        .collect()
}

fn covers(clause: &Clause, rels: &RelationTable, t: &Tuple) -> bool {
    clause_matches(clause, rels, &tuple_domains(t))
}

/// All candidate literals over the example variables: every background
/// relation, every assignment of its non-time positions to example
/// variables, positive and negated. Time is always variable 0.
fn candidate_literals(background: &RelationTable, nvars: usize) -> Vec<Literal> {
    let mut out = Vec::new();
    for (name, rel) in background {
        let slots = rel.arity() - 1;
        let mut combo = vec![1usize; slots];
        loop {
            let mut args: SmallVec<[Term; 3]> = SmallVec::new();
            args.push(Term::Var(0));
            for &v in &combo {
                args.push(Term::Var(v));
            }
            for negated in [false, true] {
                out.push(Literal {
                    relation: name.clone(),
                    negated,
                    args: args.clone(),
                });
            }

            // Next combination over vars 1..nvars.
            let mut i = 0;
            loop {
                if i == slots {
                    break;
                }
                combo[i] += 1;
                if combo[i] < nvars {
                    break;
                }
                combo[i] = 1;
                i += 1;
            }
            if i == slots {
                break;
            }
        }
    }
    out
}

fn foil_gain(p0: usize, n0: usize, p1: usize, n1: usize) -> f64 {
    if p1 == 0 {
        return 0.0;
    }
    let info = |p: usize, n: usize| -> f64 { ((p as f64) / ((p + n) as f64)).log2() };
    p1 as f64 * (info(p1, n1) - info(p0, n0))
}

impl RuleInducer for Foil {
    fn induce(&self, pos: &Relation, neg: &Relation, background: &RelationTable) -> InducedRules {
        let mut result = InducedRules::default();
        let nvars = pos.arity();
        let candidates = candidate_literals(background, nvars);

        let mut uncovered: Vec<Tuple> = pos.iter().cloned().collect();
        let all_neg: Vec<Tuple> = neg.iter().cloned().collect();

        while !uncovered.is_empty() && result.clauses.len() < MAX_CLAUSES {
            let mut clause = Clause::default();
            let mut covered_pos = uncovered.clone();
            let mut covered_neg = all_neg.clone();

            while !covered_neg.is_empty() && clause.literals.len() < MAX_LITERALS {
                let mut best: Option<(f64, &Literal, Vec<Tuple>, Vec<Tuple>)> = None;
                for lit in &candidates {
                    if clause.literals.contains(lit) {
                        continue;
                    }
                    let mut trial = clause.clone();
                    trial.literals.push(lit.clone());
                    let p: Vec<Tuple> = covered_pos
                        .iter()
                        .filter(|t| covers(&trial, background, t))
                        .cloned()
                        .collect();
                    if p.is_empty() {
                        continue;
                    }
                    let n: Vec<Tuple> = covered_neg
                        .iter()
                        .filter(|t| covers(&trial, background, t))
                        .cloned()
                        .collect();
                    let gain = foil_gain(covered_pos.len(), covered_neg.len(), p.len(), n.len());
                    let better = match &best {
                        Some((g, ..)) => gain > *g,
                        None => gain > 0.0,
                    };
                    if better {
                        best = Some((gain, lit, p, n));
                    }
                }
                let Some((_, lit, p, n)) = best else {
                    break;
                };
                clause.literals.push(lit.clone());
                covered_pos = p;
                covered_neg = n;
            }

            if clause.is_empty() || covered_pos.is_empty() {
                break;
            }

            // False positives of this clause.
            let mut fp = Relation::new(neg.arity());
            for t in &covered_neg {
                fp.add(t[0], &t[1..]);
            }
            debug!(
                clause = %clause,
                covered = covered_pos.len(),
                false_positives = covered_neg.len(),
                "induced clause"
            );
            result.clauses.push(clause.clone());
            result.residuals.push(fp);

            uncovered.retain(|t| !covers(&clause, background, t));
        }

        // Trailing residual: positives no clause matched.
        let mut fnr = Relation::new(pos.arity());
        for t in &uncovered {
            fnr.add(t[0], &t[1..]);
        }
        result.residuals.push(fnr);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Background: "near" holds between targets and their true slot
    /// fillers; positives are the true (time, target, filler) triples.
    fn setup() -> (Relation, Relation, RelationTable) {
        let mut near = Relation::new(3);
        let mut pos = Relation::new(3);
        let mut neg = Relation::new(3);
        for t in 0..8 {
            let target = 1;
            let filler = 10 + (t % 2);
            let other = 20 + (t % 2);
            near.add(t, &[target, filler]);
            pos.add(t, &[target, filler]);
            neg.add(t, &[target, other]);
        }
        let mut bg = RelationTable::new();
        bg.insert("near".to_string(), near);
        (pos, neg, bg)
    }

    #[test]
    fn learns_separating_clause() {
        let (pos, neg, bg) = setup();
        let rules = Foil.induce(&pos, &neg, &bg);
        assert!(!rules.clauses.is_empty());
        // One clause, no false positives, no false negatives.
        assert!(rules.residuals.iter().all(Relation::is_empty));
        // The learned clause should reference the near relation.
        assert!(rules.clauses[0]
            .literals
            .iter()
            .any(|l| l.relation == "near"));
    }

    #[test]
    fn inseparable_data_leaves_residual() {
        // Positives and negatives with identical background support.
        let mut same = Relation::new(3);
        let mut pos = Relation::new(3);
        let mut neg = Relation::new(3);
        for t in 0..6 {
            same.add(t, &[1, 2]);
            pos.add(t, &[1, 2]);
            neg.add(t, &[1, 2]);
        }
        let mut bg = RelationTable::new();
        bg.insert("same".to_string(), same);

        let rules = Foil.induce(&pos, &neg, &bg);
        // Either no clause was kept, or whatever matched also matched the
        // negatives; the trailing residual reports uncovered positives.
        let uncovered = rules.residuals.last().unwrap();
        assert!(rules.clauses.is_empty() || !rules.residuals[0].is_empty());
        assert!(uncovered.len() <= pos.len());
    }

    #[test]
    fn gain_prefers_pure_coverage() {
        assert!(foil_gain(10, 10, 10, 0) > foil_gain(10, 10, 10, 5));
        assert_eq!(foil_gain(10, 10, 0, 0), 0.0);
    }
}
