//! Minimal pixel-diff representation of label edits.
//!
//! A [`LabelChange`] relabels one coordinate set from a single old label to a
//! single new label; a [`CommandEntry`] batches changes into one undoable
//! unit. Entries are immutable once constructed; inverting produces a new
//! entry.

use std::cell::OnceCell;
use std::collections::BTreeMap;

use ndarray::Array2;

use crate::model::hierarchy::Label;

/// Inclusive pixel bounding box (rows/cols).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub top: usize,
    pub left: usize,
    pub bottom: usize,
    pub right: usize,
}

impl BoundingBox {
    /// Tight box around a coordinate set; `None` when empty.
    pub fn of_coords(coords: &[(usize, usize)]) -> Option<BoundingBox> {
        let mut iter = coords.iter();
        let &(row, col) = iter.next()?;
        let mut bbox = BoundingBox {
            top: row,
            left: col,
            bottom: row,
            right: col,
        };
        for &(row, col) in iter {
            bbox.top = bbox.top.min(row);
            bbox.left = bbox.left.min(col);
            bbox.bottom = bbox.bottom.max(row);
            bbox.right = bbox.right.max(col);
        }
        Some(bbox)
    }

    pub fn union(self, other: BoundingBox) -> BoundingBox {
        BoundingBox {
            top: self.top.min(other.top),
            left: self.left.min(other.left),
            bottom: self.bottom.max(other.bottom),
            right: self.right.max(other.right),
        }
    }

    pub fn height(&self) -> usize {
        self.bottom - self.top + 1
    }

    pub fn width(&self) -> usize {
        self.right - self.left + 1
    }
}

/// An atomic pixel-set relabeling.
///
/// All coordinates share `old_label`; multi-old-label edits are split into
/// several changes (see [`label_difference_to_label_changes`]).
#[derive(Debug, Clone)]
pub struct LabelChange {
    pub coords: Vec<(usize, usize)>,
    pub old_label: Label,
    pub new_label: Label,
    /// Target layer name ("Labels", "Reflections", ...).
    pub layer: String,
    bbox: Option<BoundingBox>,
}

impl LabelChange {
    pub fn new(
        coords: Vec<(usize, usize)>,
        old_label: Label,
        new_label: Label,
        layer: impl Into<String>,
    ) -> Self {
        let bbox = BoundingBox::of_coords(&coords);
        Self {
            coords,
            old_label,
            new_label,
            layer: layer.into(),
            bbox,
        }
    }

    /// The inverse change: same coordinates, labels swapped.
    pub fn invert(&self) -> LabelChange {
        LabelChange {
            coords: self.coords.clone(),
            old_label: self.new_label,
            new_label: self.old_label,
            layer: self.layer.clone(),
            bbox: self.bbox,
        }
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        self.bbox
    }

    /// Drop every coordinate for which `keep` is false, updating the bbox.
    pub(crate) fn retain_coords(&mut self, keep: impl Fn(usize, usize) -> bool) {
        self.coords.retain(|&(row, col)| keep(row, col));
        self.bbox = BoundingBox::of_coords(&self.coords);
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }
}

/// Whether executing a command performs or reverts a user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoType {
    Do,
    Undo,
}

impl DoType {
    pub fn invert(self) -> DoType {
        match self {
            DoType::Do => DoType::Undo,
            DoType::Undo => DoType::Do,
        }
    }
}

/// Kind of command: pixel relabeling, or a structural whole-image rotation
/// that bypasses the pixel-diff path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Relabel,
    Rot90Cw,
    Rot90Ccw,
}

impl CommandKind {
    pub fn invert(self) -> CommandKind {
        match self {
            CommandKind::Relabel => CommandKind::Relabel,
            CommandKind::Rot90Cw => CommandKind::Rot90Ccw,
            CommandKind::Rot90Ccw => CommandKind::Rot90Cw,
        }
    }
}

/// An ordered batch of changes forming one undoable unit.
#[derive(Debug, Clone)]
pub struct CommandEntry {
    pub changes: Vec<LabelChange>,
    pub do_type: DoType,
    /// Layer the command targets.
    pub layer: String,
    pub kind: CommandKind,
    bbox: OnceCell<Option<BoundingBox>>,
}

impl CommandEntry {
    /// A pixel relabeling command.
    pub fn relabel(layer: impl Into<String>, changes: Vec<LabelChange>) -> Self {
        Self {
            changes,
            do_type: DoType::Do,
            layer: layer.into(),
            kind: CommandKind::Relabel,
            bbox: OnceCell::new(),
        }
    }

    /// A structural rotation command. Carries no pixel changes.
    pub fn rotation(kind: CommandKind) -> Self {
        debug_assert!(kind != CommandKind::Relabel);
        Self {
            changes: Vec::new(),
            do_type: DoType::Do,
            layer: String::new(),
            kind,
            bbox: OnceCell::new(),
        }
    }

    /// A new entry that reverts this one: inverted changes in reverse order,
    /// flipped do/undo direction, inverted kind.
    pub fn invert(&self) -> CommandEntry {
        CommandEntry {
            changes: self.changes.iter().rev().map(LabelChange::invert).collect(),
            do_type: self.do_type.invert(),
            layer: self.layer.clone(),
            kind: self.kind.invert(),
            bbox: OnceCell::new(),
        }
    }

    /// Union of the constituent changes' bounding boxes; computed lazily and
    /// cached.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        *self.bbox.get_or_init(|| {
            self.changes
                .iter()
                .filter_map(LabelChange::bbox)
                .reduce(BoundingBox::union)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.kind == CommandKind::Relabel && self.changes.iter().all(LabelChange::is_empty)
    }
}

/// Convert a raw diff into label changes.
///
/// `edit_layer` is a sparse paint record: -1 means "untouched", any other
/// value is the label painted there. Touched pixels are grouped by the
/// painted label and, within that, by the pixel's previous value in
/// `raster`, emitting one change per (old, new) pair so that undo can
/// restore each pixel to its own prior value. Pixels whose painted value
/// equals their current value are dropped.
pub fn label_difference_to_label_changes(
    edit_layer: &Array2<i64>,
    raster: &Array2<Label>,
    layer: &str,
) -> Vec<LabelChange> {
    debug_assert_eq!(edit_layer.dim(), raster.dim());
    let mut groups: BTreeMap<(Label, Label), Vec<(usize, usize)>> = BTreeMap::new();
    for ((row, col), &painted) in edit_layer.indexed_iter() {
        if painted < 0 {
            continue;
        }
        let new_label = painted as Label;
        let old_label = raster[(row, col)];
        if new_label == old_label {
            continue;
        }
        groups
            .entry((old_label, new_label))
            .or_default()
            .push((row, col));
    }
    groups
        .into_iter()
        .map(|((old_label, new_label), coords)| {
            LabelChange::new(coords, old_label, new_label, layer)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_bbox_of_coords() {
        let bbox = BoundingBox::of_coords(&[(2, 3), (5, 1), (4, 4)]).unwrap();
        assert_eq!(
            bbox,
            BoundingBox {
                top: 2,
                left: 1,
                bottom: 5,
                right: 4
            }
        );
        assert!(BoundingBox::of_coords(&[]).is_none());
    }

    #[test]
    fn test_change_invert_swaps_labels() {
        let change = LabelChange::new(vec![(0, 0), (1, 1)], 1, 2, "Labels");
        let inverse = change.invert();
        assert_eq!(inverse.old_label, 2);
        assert_eq!(inverse.new_label, 1);
        assert_eq!(inverse.coords, change.coords);
        assert_eq!(inverse.bbox(), change.bbox());
    }

    #[test]
    fn test_command_invert_reverses_order_and_direction() {
        let entry = CommandEntry::relabel(
            "Labels",
            vec![
                LabelChange::new(vec![(0, 0)], 1, 2, "Labels"),
                LabelChange::new(vec![(0, 0)], 2, 3, "Labels"),
            ],
        );
        let inverse = entry.invert();
        assert_eq!(inverse.do_type, DoType::Undo);
        assert_eq!(inverse.changes[0].old_label, 3);
        assert_eq!(inverse.changes[1].new_label, 1);
    }

    #[test]
    fn test_rotation_kind_inverts_to_opposite() {
        let entry = CommandEntry::rotation(CommandKind::Rot90Cw);
        assert_eq!(entry.invert().kind, CommandKind::Rot90Ccw);
    }

    #[test]
    fn test_command_bounding_box_unions_changes() {
        let entry = CommandEntry::relabel(
            "Labels",
            vec![
                LabelChange::new(vec![(1, 1)], 0, 1, "Labels"),
                LabelChange::new(vec![(4, 6)], 0, 2, "Labels"),
            ],
        );
        assert_eq!(
            entry.bounding_box().unwrap(),
            BoundingBox {
                top: 1,
                left: 1,
                bottom: 4,
                right: 6
            }
        );
    }

    #[test]
    fn test_diff_groups_by_old_and_new_label() {
        let raster = arr2(&[[1u32, 1, 2], [2, 0, 0]]);
        let edit = arr2(&[[3i64, -1, 3], [3, -1, 0]]);
        let changes = label_difference_to_label_changes(&edit, &raster, "Labels");
        // (1 -> 3), (2 -> 3); painting 0 over 0 is dropped.
        assert_eq!(changes.len(), 2);
        assert_eq!((changes[0].old_label, changes[0].new_label), (1, 3));
        assert_eq!(changes[0].coords, vec![(0, 0)]);
        assert_eq!((changes[1].old_label, changes[1].new_label), (2, 3));
        assert_eq!(changes[1].coords, vec![(0, 2), (1, 0)]);
    }

    #[test]
    fn test_diff_replay_reproduces_target() {
        let old = arr2(&[[1u32, 1, 2], [2, 0, 1]]);
        let new = arr2(&[[1u32, 3, 3], [2, 2, 1]]);
        let edit = ndarray::Array2::from_shape_fn(old.dim(), |idx| {
            if old[idx] == new[idx] {
                -1i64
            } else {
                new[idx] as i64
            }
        });
        let changes = label_difference_to_label_changes(&edit, &old, "Labels");
        let mut replayed = old.clone();
        for change in &changes {
            for &(row, col) in &change.coords {
                assert_eq!(replayed[(row, col)], change.old_label);
                replayed[(row, col)] = change.new_label;
            }
        }
        assert_eq!(replayed, new);
    }
}
