//! A single label raster bound to one hierarchy and one named layer.
//!
//! All raster mutation flows through the edit executor so that the dirty
//! flag and the timestamp stay correct; external code reads derived views
//! and masks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::change::LabelChange;
use crate::model::hierarchy::{Label, LabelHierarchy};
use crate::model::property::RegionProperty;

/// Process-global monotonic clock for mutation timestamps. Layer
/// reconciliation compares timestamps across label images, so they must be
/// drawn from one counter.
static CLOCK: AtomicU64 = AtomicU64::new(1);

fn next_timestamp() -> u64 {
    CLOCK.fetch_add(1, Ordering::Relaxed)
}

/// Errors from raster replacement and lookups.
#[derive(Error, Debug)]
pub enum LabelImageError {
    /// Replacement raster has different dimensions
    #[error("raster shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },

    /// Resize factor must be positive and finite
    #[error("invalid resize factor {0}")]
    InvalidResizeFactor(f64),
}

/// Static configuration of one label layer, read from the project
/// configuration next to the hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerInfo {
    pub name: String,
    /// Layer whose nonzero region this layer's pixels must stay within.
    #[serde(default)]
    pub constrain_to: Option<String>,
    /// Whether this layer is shown first when a photo is opened.
    #[serde(default)]
    pub is_default: bool,
}

impl LayerInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constrain_to: None,
            is_default: false,
        }
    }

    pub fn constrained_to(mut self, layer: impl Into<String>) -> Self {
        self.constrain_to = Some(layer.into());
        self
    }
}

/// Rotation direction for structural transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Clockwise,
    CounterClockwise,
}

/// A 2D raster of label values for one photo layer.
#[derive(Debug, Clone)]
pub struct LabelImage {
    layer: String,
    raster: Array2<Label>,
    hierarchy: Arc<LabelHierarchy>,
    constrain_to: Option<String>,
    /// Bumped from the global clock on every raster mutation.
    timestamp: u64,
    /// Raster differs from its persisted form.
    raster_dirty: bool,
    /// Property table differs from its persisted side-car.
    props_dirty: bool,
    is_segmented: bool,
    used_labels: Option<HashSet<Label>>,
    /// label -> property key -> record.
    region_props: HashMap<Label, HashMap<String, RegionProperty>>,
}

impl LabelImage {
    /// Create an empty (all background) label image.
    pub fn empty(
        layer: impl Into<String>,
        size: (usize, usize),
        hierarchy: Arc<LabelHierarchy>,
        constrain_to: Option<String>,
    ) -> Self {
        Self::from_raster(layer, Array2::zeros(size), hierarchy, constrain_to)
    }

    /// Wrap an existing raster (e.g. loaded from storage).
    pub fn from_raster(
        layer: impl Into<String>,
        raster: Array2<Label>,
        hierarchy: Arc<LabelHierarchy>,
        constrain_to: Option<String>,
    ) -> Self {
        let is_segmented = raster.iter().any(|&v| v != 0);
        Self {
            layer: layer.into(),
            raster,
            hierarchy,
            constrain_to,
            timestamp: next_timestamp(),
            raster_dirty: false,
            props_dirty: false,
            is_segmented,
            used_labels: None,
            region_props: HashMap::new(),
        }
    }

    pub fn layer(&self) -> &str {
        &self.layer
    }

    pub fn hierarchy(&self) -> &Arc<LabelHierarchy> {
        &self.hierarchy
    }

    /// Name of the layer this layer's pixels are constrained to, if any.
    pub fn constrain_to(&self) -> Option<&str> {
        self.constrain_to.as_deref()
    }

    pub fn size(&self) -> (usize, usize) {
        self.raster.dim()
    }

    pub fn raster(&self) -> &Array2<Label> {
        &self.raster
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Whether the raster has unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.raster_dirty
    }

    /// Whether the property table has unsaved changes.
    pub fn props_dirty(&self) -> bool {
        self.props_dirty
    }

    /// True iff any pixel is labeled.
    pub fn is_segmented(&self) -> bool {
        self.is_segmented
    }

    /// Derived read-only raster with every pixel masked down to `level`.
    ///
    /// Returns `None` when `level` is deeper than the hierarchy.
    pub fn level_view(&self, level: usize) -> Option<Array2<Label>> {
        if level >= self.hierarchy.level_count() {
            return None;
        }
        let mask = self.hierarchy.level_mask(level);
        Some(self.raster.mapv(|v| v & mask))
    }

    /// Binary mask of the pixels labeled `label` or one of its descendants.
    ///
    /// Label 0 yields the background mask.
    pub fn mask_for(&self, label: Label) -> Array2<bool> {
        match self.hierarchy.get_level(label) {
            Some(level) => {
                let level_mask = self.hierarchy.level_mask(level);
                self.raster.mapv(|v| v & level_mask == label)
            }
            None => self.raster.mapv(|v| v == 0),
        }
    }

    /// Replace the backing raster. Fails if the dimensions differ; the
    /// element type is fixed by the type system, so the dtype check of the
    /// raster contract is enforced at compile time.
    pub fn set_raster(&mut self, raster: Array2<Label>) -> Result<(), LabelImageError> {
        if raster.dim() != self.raster.dim() {
            return Err(LabelImageError::ShapeMismatch {
                expected: self.raster.dim(),
                got: raster.dim(),
            });
        }
        self.raster = raster;
        self.mark_mutated();
        Ok(())
    }

    /// Apply one relabeling in place. Reserved for the edit executor, which
    /// only builds changes from coordinates of this raster; coordinates
    /// outside it are a caller bug.
    pub(crate) fn apply_change(&mut self, change: &LabelChange) {
        let (rows, cols) = self.raster.dim();
        for &(row, col) in &change.coords {
            debug_assert!(
                row < rows && col < cols,
                "change coordinate ({row}, {col}) outside {rows}x{cols} raster"
            );
            self.raster[(row, col)] = change.new_label;
        }
        self.mark_mutated();
    }

    fn mark_mutated(&mut self) {
        self.raster_dirty = true;
        self.timestamp = next_timestamp();
        self.used_labels = None;
        self.is_segmented = self.raster.iter().any(|&v| v != 0);
    }

    /// Labels present in the raster; recomputed lazily, cached until the
    /// next mutation.
    pub fn used_labels(&mut self) -> &HashSet<Label> {
        let raster = &self.raster;
        self.used_labels
            .get_or_insert_with(|| raster.iter().copied().collect())
    }

    /// Attach a measurement record, replacing any previous record with the
    /// same key for that label. Marks the side-car dirty; the raster's own
    /// dirty flag and timestamp are untouched.
    pub fn set_region_prop(&mut self, label: Label, prop: RegionProperty) {
        self.region_props
            .entry(label)
            .or_default()
            .insert(prop.info.key.clone(), prop);
        self.props_dirty = true;
    }

    /// Measurement records for one region, keyed by property key.
    pub fn get_region_props(&self, label: Label) -> Option<&HashMap<String, RegionProperty>> {
        self.region_props.get(&label)
    }

    /// The whole property table.
    pub fn region_props(&self) -> &HashMap<Label, HashMap<String, RegionProperty>> {
        &self.region_props
    }

    /// Drop every record for one region, e.g. after the region is erased.
    pub fn remove_region_props(&mut self, label: Label) -> Option<HashMap<String, RegionProperty>> {
        let removed = self.region_props.remove(&label);
        if removed.is_some() {
            self.props_dirty = true;
        }
        removed
    }

    pub fn clear_region_props(&mut self) {
        if !self.region_props.is_empty() {
            self.region_props.clear();
            self.props_dirty = true;
        }
    }

    /// Replace the property table wholesale (used when loading a side-car).
    pub fn load_region_props(&mut self, props: Vec<RegionProperty>) {
        self.region_props.clear();
        for prop in props {
            self.region_props
                .entry(prop.label)
                .or_default()
                .insert(prop.info.key.clone(), prop);
        }
        self.props_dirty = false;
    }

    pub(crate) fn mark_saved(&mut self) {
        self.raster_dirty = false;
        self.props_dirty = false;
    }

    /// Rotate the raster by 90 degrees. Invalidates cached labels; the
    /// caller (executor) must clear the photo's undo/redo stacks since
    /// stored pixel coordinates become meaningless.
    pub fn rotate(&mut self, direction: Rotation) {
        let (rows, cols) = self.raster.dim();
        let source = &self.raster;
        self.raster = match direction {
            Rotation::Clockwise => {
                Array2::from_shape_fn((cols, rows), |(r, c)| source[(rows - 1 - c, r)])
            }
            Rotation::CounterClockwise => {
                Array2::from_shape_fn((cols, rows), |(r, c)| source[(c, cols - 1 - r)])
            }
        };
        self.mark_mutated();
    }

    /// Nearest-neighbor resize by `factor`. Same stack-clearing requirement
    /// as [`Self::rotate`].
    pub fn resize(&mut self, factor: f64) -> Result<(), LabelImageError> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(LabelImageError::InvalidResizeFactor(factor));
        }
        let (rows, cols) = self.raster.dim();
        let new_rows = ((rows as f64) * factor).round().max(1.0) as usize;
        let new_cols = ((cols as f64) * factor).round().max(1.0) as usize;
        let source = std::mem::replace(&mut self.raster, Array2::zeros((0, 0)));
        self.raster = Array2::from_shape_fn((new_rows, new_cols), |(r, c)| {
            let src_r = (((r as f64) / factor) as usize).min(rows - 1);
            let src_c = (((c as f64) / factor) as usize).min(cols - 1);
            source[(src_r, src_c)]
        });
        self.mark_mutated();
        Ok(())
    }
}
