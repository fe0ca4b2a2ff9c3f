//! Append-only registry of named regions.
//!
//! Anchors are stored in discovery order, which is also report order, and
//! indexed by name. An anchor's depth is fixed when it is first seen and is
//! never recomputed, even if the region is later entered from elsewhere.

use std::collections::HashMap;

use crate::error::Error;

/// Index of an anchor in its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnchorId(pub(crate) usize);

/// Aggregated data for one named region.
#[derive(Debug, Clone)]
pub struct Anchor {
    pub(crate) name: String,
    pub(crate) hits: u64,
    pub(crate) depth: u32,
    pub(crate) exclusive_cycles: u64,
    pub(crate) bytes_processed: u64,
    pub(crate) active: bool,
    pub(crate) parent: Option<AnchorId>,
}

impl Anchor {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of `begin` calls.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Cycles spent in this region, excluding nested regions.
    pub fn exclusive_cycles(&self) -> u64 {
        self.exclusive_cycles
    }

    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    /// False while a nested region has interrupted this one.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The anchor that was current when this one was discovered.
    pub fn parent(&self) -> Option<AnchorId> {
        self.parent
    }

    pub fn elapsed_ms(&self, frequency: u64) -> f64 {
        cycles_to_ms(self.exclusive_cycles, frequency)
    }
}

pub(crate) fn cycles_to_ms(cycles: u64, frequency: u64) -> f64 {
    if frequency == 0 {
        return 0.0;
    }
    cycles as f64 / (frequency as f64 / 1000.0)
}

/// Cut `name` to at most `max_len` bytes on a char boundary.
///
/// Distinct names sharing a truncated prefix map to the same anchor.
pub fn truncate_name(name: &str, max_len: usize) -> &str {
    if name.len() <= max_len {
        return name;
    }
    let mut end = max_len;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

#[derive(Debug)]
pub struct AnchorTable {
    anchors: Vec<Anchor>,
    by_name: HashMap<String, AnchorId>,
    capacity: usize,
    name_max_len: usize,
}

impl AnchorTable {
    pub fn new(capacity: usize, name_max_len: usize) -> Self {
        Self {
            anchors: Vec::new(),
            by_name: HashMap::new(),
            capacity,
            name_max_len,
        }
    }

    pub fn lookup(&self, name: &str) -> Option<AnchorId> {
        self.by_name
            .get(truncate_name(name, self.name_max_len))
            .copied()
    }

    /// Resolve `name`, registering it under `current` if it is new.
    pub fn lookup_or_create(
        &mut self,
        name: &str,
        current: Option<AnchorId>,
    ) -> Result<AnchorId, Error> {
        let name = truncate_name(name, self.name_max_len);
        if let Some(&id) = self.by_name.get(name) {
            return Ok(id);
        }
        if self.anchors.len() >= self.capacity {
            return Err(Error::AnchorCapacityExceeded {
                capacity: self.capacity,
                name: name.to_owned(),
            });
        }

        let depth = current.map_or(0, |p| self.anchors[p.0].depth + 1);
        let id = AnchorId(self.anchors.len());
        self.anchors.push(Anchor {
            name: name.to_owned(),
            hits: 0,
            depth,
            exclusive_cycles: 0,
            bytes_processed: 0,
            active: true,
            parent: current,
        });
        self.by_name.insert(name.to_owned(), id);
        Ok(id)
    }

    pub fn get(&self, id: AnchorId) -> &Anchor {
        &self.anchors[id.0]
    }

    pub(crate) fn get_mut(&mut self, id: AnchorId) -> &mut Anchor {
        &mut self.anchors[id.0]
    }

    /// All anchors in discovery order.
    pub fn as_slice(&self) -> &[Anchor] {
        &self.anchors
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn clear(&mut self) {
        self.anchors.clear();
        self.by_name.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_follows_the_current_anchor() {
        let mut table = AnchorTable::new(10, 18);
        let root = table.lookup_or_create("root", None).unwrap();
        let child = table.lookup_or_create("child", Some(root)).unwrap();
        let grandchild = table.lookup_or_create("grandchild", Some(child)).unwrap();

        assert_eq!(table.get(root).depth(), 0);
        assert_eq!(table.get(child).depth(), 1);
        assert_eq!(table.get(grandchild).depth(), 2);
        assert_eq!(table.get(grandchild).parent(), Some(child));
    }

    #[test]
    fn known_name_keeps_its_first_depth() {
        let mut table = AnchorTable::new(10, 18);
        let a = table.lookup_or_create("a", None).unwrap();
        let b = table.lookup_or_create("b", Some(a)).unwrap();
        let again = table.lookup_or_create("b", None).unwrap();
        assert_eq!(b, again);
        assert_eq!(table.get(again).depth(), 1);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn insertion_order_is_preserved() {
        let mut table = AnchorTable::new(10, 18);
        for name in ["zeta", "alpha", "mid"] {
            table.lookup_or_create(name, None).unwrap();
        }
        let names: Vec<&str> = table.as_slice().iter().map(Anchor::name).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn full_table_rejects_new_names_only() {
        let mut table = AnchorTable::new(2, 18);
        table.lookup_or_create("one", None).unwrap();
        table.lookup_or_create("two", None).unwrap();

        let err = table.lookup_or_create("three", None).unwrap_err();
        assert_eq!(
            err,
            Error::AnchorCapacityExceeded {
                capacity: 2,
                name: "three".into()
            }
        );
        // Known names still resolve.
        assert!(table.lookup_or_create("one", None).is_ok());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn long_names_collide_after_truncation() {
        let mut table = AnchorTable::new(10, 8);
        let a = table.lookup_or_create("decode_header", None).unwrap();
        let b = table.lookup_or_create("decode_headers_fast", None).unwrap();
        assert_eq!(a, b);
        assert_eq!(table.get(a).name(), "decode_h");
        assert_eq!(table.lookup("decode_hXYZ"), Some(a));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // 'é' is two bytes; cutting at 2 would split it.
        assert_eq!(truncate_name("aé", 2), "a");
        assert_eq!(truncate_name("short", 18), "short");
        assert_eq!(truncate_name("exactly", 7), "exactly");
    }

    #[test]
    fn elapsed_ms_handles_zero_frequency() {
        let mut table = AnchorTable::new(1, 18);
        let id = table.lookup_or_create("x", None).unwrap();
        table.get_mut(id).exclusive_cycles = 5_000;
        assert_eq!(table.get(id).elapsed_ms(0), 0.0);
        assert!((table.get(id).elapsed_ms(1_000_000) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn clear_empties_both_indexes() {
        let mut table = AnchorTable::new(4, 18);
        table.lookup_or_create("x", None).unwrap();
        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.lookup("x"), None);
    }
}
