//! Relational clauses and clause testing.
//!
//! A clause is a conjunction of literals over the relation table, with
//! shared variables. By convention variable 0 is the time index, variable 1
//! the target object, and variable 2 the object being solved for; induced
//! clauses may introduce further variables.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::relation::RelationTable;

/// A term in a literal: a shared variable or a ground object id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Term {
    Var(usize),
    Const(i64),
}

/// One literal: a (possibly negated) relation atom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Literal {
    pub relation: String,
    pub negated: bool,
    pub args: SmallVec<[Term; 3]>,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "~")?;
        }
        write!(f, "{}(", self.relation)?;
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            match a {
                Term::Var(v) => write!(f, "V{v}")?,
                Term::Const(c) => write!(f, "{c}")?,
            }
        }
        write!(f, ")")
    }
}

/// A conjunction of literals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    pub literals: Vec<Literal>,
}

impl Clause {
    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }

    /// All variables mentioned by the clause.
    pub fn vars(&self) -> BTreeSet<usize> {
        let mut vs = BTreeSet::new();
        for lit in &self.literals {
            for a in &lit.args {
                if let Term::Var(v) = a {
                    vs.insert(*v);
                }
            }
        }
        vs
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, lit) in self.literals.iter().enumerate() {
            if i > 0 {
                write!(f, " & ")?;
            }
            write!(f, "{lit}")?;
        }
        Ok(())
    }
}

/// Initial variable domains for clause testing.
pub type VarDomains = BTreeMap<usize, BTreeSet<i64>>;

/// Backtracking satisfier over the relation table.
struct Solver<'a> {
    clause: &'a Clause,
    rels: &'a RelationTable,
}

impl<'a> Solver<'a> {
    /// Candidate values for a variable: its seeded domain if present, else
    /// every value occurring at the positions where it appears in positive
    /// literals.
    fn domain(&self, var: usize, seed: &VarDomains) -> BTreeSet<i64> {
        if let Some(d) = seed.get(&var) {
            return d.clone();
        }
        let mut d = BTreeSet::new();
        for lit in &self.clause.literals {
            if lit.negated {
                continue;
            }
            let Some(rel) = self.rels.get(&lit.relation) else {
                continue;
            };
            for (pos, a) in lit.args.iter().enumerate() {
                if *a == Term::Var(var) {
                    d.extend(rel.at_pos(pos));
                }
            }
        }
        d
    }

    /// Check every literal that is fully ground under `assign`.
    fn consistent(&self, assign: &BTreeMap<usize, i64>) -> bool {
        for lit in &self.clause.literals {
            let mut tuple: SmallVec<[i64; 3]> = SmallVec::new();
            let mut ground = true;
            for a in &lit.args {
                match a {
                    Term::Const(c) => tuple.push(*c),
                    Term::Var(v) => match assign.get(v) {
                        Some(val) => tuple.push(*val),
                        None => {
                            ground = false;
                            break;
                        }
                    },
                }
            }
            if !ground {
                continue;
            }
            let present = self
                .rels
                .get(&lit.relation)
                .is_some_and(|r| r.contains(&tuple));
            if present == lit.negated {
                return false;
            }
        }
        true
    }

    /// Enumerate satisfying assignments, feeding each to `found`. `found`
    /// returns false to stop the search.
    fn solve(
        &self,
        order: &[usize],
        domains: &BTreeMap<usize, BTreeSet<i64>>,
        assign: &mut BTreeMap<usize, i64>,
        found: &mut dyn FnMut(&BTreeMap<usize, i64>) -> bool,
    ) -> bool {
        let Some((&var, rest)) = order.split_first() else {
            return found(assign);
        };
        for &val in &domains[&var] {
            assign.insert(var, val);
            if self.consistent(assign) && !self.solve(rest, domains, assign, found) {
                assign.remove(&var);
                return false;
            }
            assign.remove(&var);
        }
        true
    }

    fn run(&self, seed: &VarDomains, found: &mut dyn FnMut(&BTreeMap<usize, i64>) -> bool) {
        let vars: Vec<usize> = self.clause.vars().into_iter().collect();
        let domains: BTreeMap<usize, BTreeSet<i64>> = vars
            .iter()
            .map(|&v| (v, self.domain(v, seed)))
            .collect();
        // Smallest-domain-first keeps backtracking shallow.
        let mut order = vars;
        order.sort_by_key(|v| domains[v].len());
        let mut assign = BTreeMap::new();
        self.solve(&order, &domains, &mut assign, found);
    }
}

/// Whether the clause has any satisfying assignment consistent with the
/// seeded domains. The empty clause matches vacuously.
pub fn clause_matches(clause: &Clause, rels: &RelationTable, seed: &VarDomains) -> bool {
    if clause.is_empty() {
        return true;
    }
    let mut hit = false;
    Solver { clause, rels }.run(seed, &mut |_| {
        hit = true;
        false
    });
    hit
}

/// All values the query variable takes across satisfying assignments.
pub fn clause_query(
    clause: &Clause,
    rels: &RelationTable,
    seed: &VarDomains,
    query_var: usize,
) -> BTreeSet<i64> {
    let mut values = BTreeSet::new();
    Solver { clause, rels }.run(seed, &mut |assign| {
        if let Some(v) = assign.get(&query_var) {
            values.insert(*v);
        }
        true
    });
    values
}

/// Index of the first clause in the list with a satisfying assignment.
pub fn first_matching_clause(
    clauses: &[Clause],
    rels: &RelationTable,
    seed: &VarDomains,
) -> Option<usize> {
    clauses.iter().position(|c| clause_matches(c, rels, seed))
}
