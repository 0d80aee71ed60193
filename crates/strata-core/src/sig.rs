//! Scene signatures.
//!
//! A signature is an ordered list of object-type descriptors. It defines the
//! layout of an observation's input vector: one contiguous block of property
//! values per object, in signature order.

use serde::{Deserialize, Serialize};

/// One object's descriptor within a signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSig {
    /// Runtime object id, used in relation tuples.
    pub id: i64,
    /// Type tag; slot compatibility is decided on this alone.
    pub type_id: i32,
    /// Object name, for inspection only.
    pub name: String,
    /// Ordered property names; the object's block width.
    pub props: Vec<String>,
    /// Offset of this object's block in the input vector.
    pub start: usize,
}

impl PartialEq for ObjectSig {
    /// Structural equality: type, name, and property layout. The runtime id
    /// and the derived offset do not participate, so the same scene shape
    /// interns to the same entry across cycles.
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.name == other.name && self.props == other.props
    }
}

/// An ordered sequence of object descriptors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneSig {
    entries: Vec<ObjectSig>,
}

impl SceneSig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, fixing up its block offset.
    pub fn add(&mut self, mut entry: ObjectSig) {
        entry.start = self.dim();
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total property count — the input-vector length of any observation
    /// carrying this signature.
    pub fn dim(&self) -> usize {
        self.entries.iter().map(|e| e.props.len()).sum()
    }

    pub fn entries(&self) -> &[ObjectSig] {
        &self.entries
    }

    /// Index of the entry with the given runtime object id.
    pub fn find_id(&self, id: i64) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl std::ops::Index<usize> for SceneSig {
    type Output = ObjectSig;

    fn index(&self, i: usize) -> &ObjectSig {
        &self.entries[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64, type_id: i32, name: &str, props: &[&str]) -> ObjectSig {
        ObjectSig {
            id,
            type_id,
            name: name.to_string(),
            props: props.iter().map(|p| p.to_string()).collect(),
            start: 0,
        }
    }

    #[test]
    fn offsets_follow_block_widths() {
        let mut sig = SceneSig::new();
        sig.add(entry(5, 1, "a", &["x", "y"]));
        sig.add(entry(7, 1, "b", &["x", "y", "z"]));
        assert_eq!(sig[0].start, 0);
        assert_eq!(sig[1].start, 2);
        assert_eq!(sig.dim(), 5);
    }

    #[test]
    fn equality_ignores_runtime_ids() {
        let mut a = SceneSig::new();
        a.add(entry(5, 1, "a", &["x"]));
        let mut b = SceneSig::new();
        b.add(entry(9, 1, "a", &["x"]));
        assert_eq!(a, b);

        let mut c = SceneSig::new();
        c.add(entry(5, 2, "a", &["x"]));
        assert_ne!(a, c);
    }
}
