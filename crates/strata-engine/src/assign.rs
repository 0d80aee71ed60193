//! Lazy enumeration of object-to-slot assignments.
//!
//! Scoring an observation against a mode requires trying every way of
//! filling the mode's slots with type-compatible scene objects, no object
//! used twice. The iterator walks that product space lazily so callers that
//! stop early (or find no valid assignment) never materialize it.

/// Iterator over all repeat-free selections, one candidate per slot.
///
/// `candidates[s]` lists the scene-object indices eligible for slot `s`.
/// Yields one `Vec<usize>` per assignment, slot order, skipping any
/// combination that reuses an object.
#[derive(Debug, Clone)]
pub struct AssignmentIter {
    candidates: Vec<Vec<usize>>,
    indices: Vec<usize>,
    started: bool,
    exhausted: bool,
}

impl AssignmentIter {
    pub fn new(candidates: Vec<Vec<usize>>) -> Self {
        let exhausted = candidates.iter().any(Vec::is_empty);
        let indices = vec![0; candidates.len()];
        Self {
            candidates,
            indices,
            started: false,
            exhausted,
        }
    }

    /// Advance the odometer one position. Returns false on wraparound.
    fn step(&mut self) -> bool {
        for s in 0..self.indices.len() {
            self.indices[s] += 1;
            if self.indices[s] < self.candidates[s].len() {
                return true;
            }
            self.indices[s] = 0;
        }
        false
    }

    fn current(&self) -> Vec<usize> {
        self.indices
            .iter()
            .zip(&self.candidates)
            .map(|(&i, c)| c[i])
            .collect()
    }

    fn has_repeat(&self) -> bool {
        let cur = self.current();
        for (i, a) in cur.iter().enumerate() {
            if cur[..i].contains(a) {
                return true;
            }
        }
        false
    }
}

impl Iterator for AssignmentIter {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if self.exhausted {
            return None;
        }
        loop {
            if self.started {
                if !self.step() {
                    self.exhausted = true;
                    return None;
                }
            } else {
                self.started = true;
            }
            if !self.has_repeat() {
                return Some(self.current());
            }
        }
    }
}
