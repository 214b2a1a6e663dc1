//! Hierarchical region labels with a bit-packed encoding.
//!
//! A label is a `u32` whose bits are split into per-level groups: with the
//! default widths `[8, 8, 8]`, level 0 occupies bits 16..24, level 1 bits
//! 8..16 and level 2 bits 0..8. A label's ancestors are obtained by masking
//! away the deeper groups, so ancestry tests are plain bit arithmetic. All
//! bit arithmetic lives behind this type; no other module masks labels
//! directly.
//!
//! Label 0 is the background ("unset") and belongs to no level.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A region label. Hierarchically bit-encoded, 0 = background.
pub type Label = u32;

/// Errors from hierarchy construction and lookups.
#[derive(Error, Debug)]
pub enum HierarchyError {
    /// Label not present in the hierarchy
    #[error("unknown label: {0:#x}")]
    UnknownLabel(Label),

    /// Label code string that does not parse or resolve
    #[error("malformed label code: '{0}'")]
    MalformedCode(String),

    /// Two nodes carry the same label value
    #[error("duplicate label {0:#x} in hierarchy")]
    DuplicateLabel(Label),

    /// A node's bit pattern does not match its depth in the tree
    #[error("label {label:#x} at depth {depth} has level {found:?}")]
    DepthMismatch {
        label: Label,
        depth: usize,
        found: Option<usize>,
    },

    /// A child label is not an extension of its parent's bit pattern
    #[error("label {child:#x} is not a child pattern of {parent:#x}")]
    ParentMismatch { child: Label, parent: Label },

    /// No free ordinal left in a level's bit group
    #[error("bit group of level {level} is exhausted under parent {parent:#x}")]
    GroupExhausted { parent: Label, level: usize },

    /// Declared level widths exceed the 32 bits available
    #[error("level bit widths sum to {0}, exceeding 32")]
    WidthOverflow(u32),

    /// Hierarchy file without any levels
    #[error("hierarchy declares no levels")]
    NoLevels,

    /// JSON parse or serialization failure
    #[error("hierarchy JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One entry in the hierarchy tree.
///
/// Nodes are owned exclusively by the [`LabelHierarchy`]; the parent link is
/// a plain label value, not a reference.
#[derive(Debug, Clone)]
pub struct Node {
    pub label: Label,
    pub name: String,
    pub color: [u8; 3],
    /// Parent label; `None` for top-level regions.
    pub parent: Option<Label>,
    /// Child labels in insertion order.
    pub children: Vec<Label>,
}

/// One level of the hierarchy file: display name plus bit-group width.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelDef {
    pub name: String,
    #[serde(default = "default_bits")]
    pub bits: u8,
}

fn default_bits() -> u8 {
    8
}

/// Serialized node: `{label, name, color, children}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeEntry {
    label: Label,
    name: String,
    color: [u8; 3],
    #[serde(default)]
    children: Vec<NodeEntry>,
}

/// On-disk hierarchy description.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HierarchyFile {
    #[serde(default)]
    name: String,
    levels: Vec<LevelDef>,
    mask_label: Label,
    labels: Vec<NodeEntry>,
}

/// Static-per-project tree of region labels.
#[derive(Debug, Clone)]
pub struct LabelHierarchy {
    name: String,
    level_names: Vec<String>,
    /// Mask of each level's own bit group.
    group_masks: Vec<u32>,
    /// Right shift that extracts each level's group value.
    group_shifts: Vec<u32>,
    /// Cumulative masks: `level_masks[l]` covers groups `0..=l`.
    level_masks: Vec<u32>,
    nodes: HashMap<Label, Node>,
    /// Top-level labels in insertion order.
    roots: Vec<Label>,
    mask_label: Label,
}

impl LabelHierarchy {
    /// Parse a hierarchy from its JSON description.
    ///
    /// Rejects duplicate labels, labels whose bit pattern contradicts their
    /// depth or parent, and level widths that overflow 32 bits.
    pub fn from_json(json: &str) -> Result<Self, HierarchyError> {
        let file: HierarchyFile = serde_json::from_str(json)?;
        Self::from_file(file)
    }

    fn from_file(file: HierarchyFile) -> Result<Self, HierarchyError> {
        if file.levels.is_empty() {
            return Err(HierarchyError::NoLevels);
        }
        let total: u32 = file.levels.iter().map(|l| l.bits as u32).sum();
        if total > 32 {
            return Err(HierarchyError::WidthOverflow(total));
        }

        let mut group_masks = Vec::with_capacity(file.levels.len());
        let mut group_shifts = Vec::with_capacity(file.levels.len());
        let mut level_masks = Vec::with_capacity(file.levels.len());
        let mut used = 0u32;
        let mut cumulative = 0u32;
        for level in &file.levels {
            used += level.bits as u32;
            let shift = total - used;
            let mask = (((1u64 << level.bits) - 1) as u32) << shift;
            cumulative |= mask;
            group_masks.push(mask);
            group_shifts.push(shift);
            level_masks.push(cumulative);
        }

        let mut hierarchy = LabelHierarchy {
            name: file.name,
            level_names: file.levels.iter().map(|l| l.name.clone()).collect(),
            group_masks,
            group_shifts,
            level_masks,
            nodes: HashMap::new(),
            roots: Vec::new(),
            mask_label: file.mask_label,
        };

        for entry in &file.labels {
            hierarchy.insert_entry(entry, None, 0)?;
        }

        if !hierarchy.nodes.contains_key(&file.mask_label) {
            return Err(HierarchyError::UnknownLabel(file.mask_label));
        }
        log::debug!(
            "Loaded label hierarchy '{}': {} levels, {} labels",
            hierarchy.name,
            hierarchy.level_names.len(),
            hierarchy.nodes.len()
        );
        Ok(hierarchy)
    }

    fn insert_entry(
        &mut self,
        entry: &NodeEntry,
        parent: Option<Label>,
        depth: usize,
    ) -> Result<(), HierarchyError> {
        let label = entry.label;
        if self.nodes.contains_key(&label) {
            return Err(HierarchyError::DuplicateLabel(label));
        }
        if self.get_level(label) != Some(depth) {
            return Err(HierarchyError::DepthMismatch {
                label,
                depth,
                found: self.get_level(label),
            });
        }
        if let Some(parent_label) = parent {
            if label & self.level_masks[depth - 1] != parent_label {
                return Err(HierarchyError::ParentMismatch {
                    child: label,
                    parent: parent_label,
                });
            }
        }

        self.nodes.insert(
            label,
            Node {
                label,
                name: entry.name.clone(),
                color: entry.color,
                parent,
                children: Vec::new(),
            },
        );
        match parent {
            Some(parent_label) => {
                if let Some(node) = self.nodes.get_mut(&parent_label) {
                    node.children.push(label);
                }
            }
            None => self.roots.push(label),
        }

        for child in &entry.children {
            self.insert_entry(child, Some(label), depth + 1)?;
        }
        Ok(())
    }

    /// Serialize back to the JSON file form.
    pub fn to_json(&self) -> Result<String, HierarchyError> {
        fn entry_for(hierarchy: &LabelHierarchy, label: Label) -> NodeEntry {
            let node = &hierarchy.nodes[&label];
            NodeEntry {
                label,
                name: node.name.clone(),
                color: node.color,
                children: node
                    .children
                    .iter()
                    .map(|&child| entry_for(hierarchy, child))
                    .collect(),
            }
        }
        let file = HierarchyFile {
            name: self.name.clone(),
            levels: self
                .level_names
                .iter()
                .zip(&self.group_masks)
                .map(|(name, mask)| LevelDef {
                    name: name.clone(),
                    bits: mask.count_ones() as u8,
                })
                .collect(),
            mask_label: self.mask_label,
            labels: self.roots.iter().map(|&r| entry_for(self, r)).collect(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// Hierarchy display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of hierarchy levels.
    pub fn level_count(&self) -> usize {
        self.level_names.len()
    }

    /// Ordered level display names (coarsest first).
    pub fn level_names(&self) -> &[String] {
        &self.level_names
    }

    /// The designated root constraint label (e.g. the whole-specimen region).
    pub fn mask_label(&self) -> Label {
        self.mask_label
    }

    /// Cumulative bitmask covering levels `0..=level`.
    ///
    /// Masks are nested: `level_mask(0)` is a subset of `level_mask(1)` and
    /// so on. Panics if `level` is out of range; check [`Self::level_count`].
    pub fn level_mask(&self, level: usize) -> u32 {
        self.level_masks[level]
    }

    /// The level a label belongs to, i.e. the deepest level whose bit group
    /// is populated. Label 0 has no level, and neither does a label carrying
    /// bits outside every declared group.
    pub fn get_level(&self, label: Label) -> Option<usize> {
        if label == 0 {
            return None;
        }
        let all_groups = self.level_masks.last().copied().unwrap_or(0);
        if label & !all_groups != 0 {
            return None;
        }
        self.group_masks
            .iter()
            .rposition(|&mask| label & mask != 0)
    }

    /// True iff `b` lies strictly below `a`: `b`'s bit pattern at `a`'s
    /// level equals `a`. Irreflexive.
    pub fn is_ancestor_of(&self, a: Label, b: Label) -> bool {
        if a == b {
            return false;
        }
        match self.get_level(a) {
            Some(level) => b & self.level_masks[level] == a,
            None => false,
        }
    }

    /// True iff `a` lies strictly below `b`. Irreflexive.
    pub fn is_descendant_of(&self, a: Label, b: Label) -> bool {
        self.is_ancestor_of(b, a)
    }

    /// Look up a node.
    pub fn node(&self, label: Label) -> Result<&Node, HierarchyError> {
        self.nodes
            .get(&label)
            .ok_or(HierarchyError::UnknownLabel(label))
    }

    /// Ordered child labels. Label 0 yields the top-level labels.
    pub fn children(&self, label: Label) -> Result<&[Label], HierarchyError> {
        if label == 0 {
            return Ok(&self.roots);
        }
        Ok(&self.node(label)?.children)
    }

    /// Every label in the hierarchy, in no particular order.
    pub fn labels(&self) -> impl Iterator<Item = Label> + '_ {
        self.nodes.keys().copied()
    }

    /// Human-readable code: per-level group values joined by dots, e.g.
    /// `"1.1"` for `0x10100` with 8-bit groups.
    pub fn code(&self, label: Label) -> Result<String, HierarchyError> {
        let node_level = self
            .get_level(label)
            .ok_or(HierarchyError::UnknownLabel(label))?;
        self.node(label)?;
        let parts: Vec<String> = (0..=node_level)
            .map(|level| ((label & self.group_masks[level]) >> self.group_shifts[level]).to_string())
            .collect();
        Ok(parts.join("."))
    }

    /// Inverse of [`Self::code`].
    pub fn label(&self, code: &str) -> Result<Label, HierarchyError> {
        let malformed = || HierarchyError::MalformedCode(code.to_string());
        let mut label = 0u32;
        let mut depth = 0usize;
        for part in code.split('.') {
            if depth >= self.level_count() {
                return Err(malformed());
            }
            let value: u32 = part.parse().map_err(|_| malformed())?;
            if value == 0 || (value << self.group_shifts[depth]) & !self.group_masks[depth] != 0 {
                return Err(malformed());
            }
            label |= value << self.group_shifts[depth];
            depth += 1;
        }
        if !self.nodes.contains_key(&label) {
            return Err(HierarchyError::UnknownLabel(label));
        }
        Ok(label)
    }

    /// Add a new child region under `parent` (0 for a new top-level region),
    /// allocating the next free ordinal in the child level's bit group.
    pub fn add_child_label(
        &mut self,
        parent: Label,
        name: impl Into<String>,
        color: [u8; 3],
    ) -> Result<Label, HierarchyError> {
        let depth = match parent {
            0 => 0,
            _ => {
                self.node(parent)?;
                self.get_level(parent)
                    .ok_or(HierarchyError::UnknownLabel(parent))?
                    + 1
            }
        };
        if depth >= self.level_count() {
            return Err(HierarchyError::GroupExhausted {
                parent,
                level: depth,
            });
        }
        let shift = self.group_shifts[depth];
        let capacity = self.group_masks[depth] >> shift;
        let next_ordinal = self
            .children(parent)?
            .iter()
            .map(|&child| (child & self.group_masks[depth]) >> shift)
            .max()
            .unwrap_or(0)
            + 1;
        if next_ordinal > capacity {
            return Err(HierarchyError::GroupExhausted {
                parent,
                level: depth,
            });
        }
        let label = parent | (next_ordinal << shift);
        self.nodes.insert(
            label,
            Node {
                label,
                name: name.into(),
                color,
                parent: (parent != 0).then_some(parent),
                children: Vec::new(),
            },
        );
        if parent == 0 {
            self.roots.push(label);
        } else if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.push(label);
        }
        log::debug!("Added label {label:#x} under {parent:#x}");
        Ok(label)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two-level test hierarchy: specimen 0x10000 with parts 0x10100 and
    /// 0x10200, plus a reflections-style sibling 0x20000.
    pub(crate) fn test_hierarchy() -> LabelHierarchy {
        LabelHierarchy::from_json(
            r#"{
                "name": "test",
                "levels": [
                    {"name": "specimen", "bits": 8},
                    {"name": "parts", "bits": 8},
                    {"name": "segments", "bits": 8}
                ],
                "mask_label": 65536,
                "labels": [
                    {
                        "label": 65536, "name": "Specimen", "color": [200, 0, 0],
                        "children": [
                            {"label": 65792, "name": "Body", "color": [0, 200, 0]},
                            {"label": 66048, "name": "Legs", "color": [0, 0, 200]}
                        ]
                    },
                    {"label": 131072, "name": "Reflection", "color": [60, 60, 60]}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_level_masks_are_nested() {
        let h = test_hierarchy();
        for level in 1..h.level_count() {
            let coarser = h.level_mask(level - 1);
            assert_eq!(coarser & h.level_mask(level), coarser);
        }
    }

    #[test]
    fn test_get_level() {
        let h = test_hierarchy();
        assert_eq!(h.get_level(0), None);
        assert_eq!(h.get_level(0x10000), Some(0));
        assert_eq!(h.get_level(0x10100), Some(1));
        assert_eq!(h.get_level(0x10101), Some(2));
        // Bits above the three declared 8-bit groups make a label invalid.
        assert_eq!(h.get_level(0x1010100), None);
    }

    #[test]
    fn test_ancestry_follows_bit_masking() {
        let h = test_hierarchy();
        assert!(h.is_ancestor_of(0x10000, 0x10100));
        assert!(!h.is_ancestor_of(0x10100, 0x10000));
        assert!(!h.is_ancestor_of(0x10000, 0x10000));
        assert!(h.is_descendant_of(0x10100, 0x10000));
        assert!(!h.is_ancestor_of(0x20000, 0x10100));
    }

    #[test]
    fn test_level_invariants_for_descendants() {
        let h = test_hierarchy();
        // For a at level L: level_mask(L) & a == a, and for descendants b:
        // level_mask(L) & b == a.
        let a = 0x10000u32;
        let level = h.get_level(a).unwrap();
        assert_eq!(h.level_mask(level) & a, a);
        for b in [0x10100u32, 0x10200] {
            assert_eq!(h.level_mask(level) & b, a);
        }
    }

    #[test]
    fn test_code_roundtrip() {
        let h = test_hierarchy();
        assert_eq!(h.code(0x10000).unwrap(), "1");
        assert_eq!(h.code(0x10100).unwrap(), "1.1");
        assert_eq!(h.code(0x20000).unwrap(), "2");
        assert_eq!(h.label("1.1").unwrap(), 0x10100);
        assert_eq!(h.label("2").unwrap(), 0x20000);
    }

    #[test]
    fn test_unknown_and_malformed_lookups() {
        let h = test_hierarchy();
        assert!(matches!(
            h.code(0xdead00),
            Err(HierarchyError::UnknownLabel(_))
        ));
        assert!(matches!(
            h.label("1.250"),
            Err(HierarchyError::UnknownLabel(_))
        ));
        assert!(matches!(
            h.label("not.a.code"),
            Err(HierarchyError::MalformedCode(_))
        ));
        assert!(matches!(
            h.label("1.0"),
            Err(HierarchyError::MalformedCode(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_label() {
        let result = LabelHierarchy::from_json(
            r#"{
                "levels": [{"name": "a", "bits": 8}],
                "mask_label": 1,
                "labels": [
                    {"label": 1, "name": "x", "color": [0, 0, 0]},
                    {"label": 1, "name": "y", "color": [0, 0, 0]}
                ]
            }"#,
        );
        assert!(matches!(result, Err(HierarchyError::DuplicateLabel(1))));
    }

    #[test]
    fn test_rejects_depth_mismatch() {
        // 0x10100 does not fit a two-level 16-bit layout at all; the bit
        // above both groups must be rejected rather than read as level 0.
        let result = LabelHierarchy::from_json(
            r#"{
                "levels": [{"name": "a", "bits": 8}, {"name": "b", "bits": 8}],
                "mask_label": 65792,
                "labels": [{"label": 65792, "name": "x", "color": [0, 0, 0]}]
            }"#,
        );
        assert!(matches!(result, Err(HierarchyError::DepthMismatch { .. })));
    }

    #[test]
    fn test_rejects_width_overflow() {
        let result = LabelHierarchy::from_json(
            r#"{
                "levels": [{"name": "a", "bits": 20}, {"name": "b", "bits": 20}],
                "mask_label": 1,
                "labels": []
            }"#,
        );
        assert!(matches!(result, Err(HierarchyError::WidthOverflow(40))));
    }

    #[test]
    fn test_add_child_label_allocates_next_ordinal() {
        let mut h = test_hierarchy();
        let label = h.add_child_label(0x10000, "Antennae", [10, 20, 30]).unwrap();
        assert_eq!(label, 0x10300);
        assert_eq!(h.get_level(label), Some(1));
        assert!(h.is_ancestor_of(0x10000, label));
        assert_eq!(h.node(label).unwrap().parent, Some(0x10000));
    }

    #[test]
    fn test_add_child_label_exhausts_group() {
        let mut h = LabelHierarchy::from_json(
            r#"{
                "levels": [{"name": "a", "bits": 1}],
                "mask_label": 1,
                "labels": [{"label": 1, "name": "only", "color": [0, 0, 0]}]
            }"#,
        )
        .unwrap();
        assert!(matches!(
            h.add_child_label(0, "next", [0, 0, 0]),
            Err(HierarchyError::GroupExhausted { .. })
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let h = test_hierarchy();
        let json = h.to_json().unwrap();
        let h2 = LabelHierarchy::from_json(&json).unwrap();
        assert_eq!(h2.mask_label(), h.mask_label());
        assert_eq!(h2.level_count(), h.level_count());
        let mut labels: Vec<_> = h2.labels().collect();
        labels.sort_unstable();
        let mut expected: Vec<_> = h.labels().collect();
        expected.sort_unstable();
        assert_eq!(labels, expected);
    }
}
