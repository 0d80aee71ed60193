//! Time-indexed relation storage.
//!
//! A relation is a set of tuples whose first position is a time index (the
//! observation number). The engine appends one frame per observation and
//! never removes one; clause learning and clause testing read it as-is.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// One relation tuple, time at position 0.
pub type Tuple = SmallVec<[i64; 3]>;

/// A named relation's extension: a set of time-indexed tuples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    arity: usize,
    tuples: BTreeSet<Tuple>,
}

impl Relation {
    /// An empty relation of the given arity (time position included).
    pub fn new(arity: usize) -> Self {
        Self {
            arity,
            tuples: BTreeSet::new(),
        }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Insert a tuple of `time` followed by `args`.
    pub fn add(&mut self, time: i64, args: &[i64]) {
        assert_eq!(args.len() + 1, self.arity, "tuple arity mismatch");
        let mut t = Tuple::new();
        t.push(time);
        t.extend_from_slice(args);
        self.tuples.insert(t);
    }

    /// Remove a tuple of `time` followed by `args`.
    pub fn del(&mut self, time: i64, args: &[i64]) {
        let mut t = Tuple::new();
        t.push(time);
        t.extend_from_slice(args);
        self.tuples.remove(&t);
    }

    pub fn contains(&self, tuple: &[i64]) -> bool {
        self.tuples.contains(tuple)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter()
    }

    /// Distinct values at one tuple position.
    pub fn at_pos(&self, pos: usize) -> BTreeSet<i64> {
        self.tuples.iter().map(|t| t[pos]).collect()
    }

    /// Tuples matching a wildcard pattern. `None` matches anything; a
    /// pattern shorter than the arity leaves the tail unconstrained.
    pub fn matches(&self, pattern: &[Option<i64>]) -> Relation {
        assert!(pattern.len() <= self.arity, "pattern longer than arity");
        let mut out = Relation::new(self.arity);
        for t in &self.tuples {
            let ok = pattern
                .iter()
                .zip(t.iter())
                .all(|(p, v)| p.map_or(true, |p| p == *v));
            if ok {
                out.tuples.insert(t.clone());
            }
        }
        out
    }

    pub fn clear(&mut self) {
        self.tuples.clear();
    }
}

/// All relations, keyed by name. BTreeMap so iteration order is stable.
pub type RelationTable = BTreeMap<String, Relation>;

/// Merge one observation's relation frame into the accumulating table at
/// the given time index. Frame tuples carry a placeholder time in position
/// 0 (the caller's current step); it is replaced by `time`.
pub fn extend_table(table: &mut RelationTable, frame: &RelationTable, time: i64) {
    for (name, rel) in frame {
        let dest = table
            .entry(name.clone())
            .or_insert_with(|| Relation::new(rel.arity()));
        assert_eq!(dest.arity(), rel.arity(), "relation {name} changed arity");
        for t in rel.iter() {
            dest.add(time, &t[1..]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matching() {
        let mut r = Relation::new(3);
        r.add(0, &[1, 2]);
        r.add(0, &[1, 3]);
        r.add(1, &[4, 2]);

        assert_eq!(r.matches(&[Some(0)]).len(), 2);
        assert_eq!(r.matches(&[None, Some(1)]).len(), 2);
        assert_eq!(r.matches(&[None, None, Some(2)]).len(), 2);
        assert_eq!(r.matches(&[Some(1), Some(4), Some(2)]).len(), 1);
    }

    proptest::proptest! {
        #[test]
        fn matches_is_a_filter(tuples in proptest::collection::vec((0i64..5, 0i64..5, 0i64..5), 0..40),
                               a in proptest::option::of(0i64..5),
                               b in proptest::option::of(0i64..5)) {
            let mut r = Relation::new(3);
            for (t, x, y) in tuples {
                r.add(t, &[x, y]);
            }
            let pattern = [a, b];
            let hits = r.matches(&pattern);
            proptest::prop_assert!(hits.len() <= r.len());
            for t in hits.iter() {
                proptest::prop_assert!(r.contains(t));
                for (p, v) in pattern.iter().zip(t.iter()) {
                    if let Some(p) = p {
                        proptest::prop_assert_eq!(p, v);
                    }
                }
            }
        }
    }

    #[test]
    fn extend_rewrites_time() {
        let mut frame = RelationTable::new();
        let mut r = Relation::new(3);
        r.add(0, &[10, 11]);
        frame.insert("on".to_string(), r);

        let mut table = RelationTable::new();
        extend_table(&mut table, &frame, 7);
        extend_table(&mut table, &frame, 8);

        let on = &table["on"];
        assert!(on.contains(&[7, 10, 11]));
        assert!(on.contains(&[8, 10, 11]));
        assert_eq!(on.len(), 2);
    }
}
