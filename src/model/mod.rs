//! In-memory model: label hierarchy, label rasters, the pixel-diff change
//! representation, measurement records and units.

pub mod change;
pub mod hierarchy;
pub mod label_image;
pub mod photo;
pub mod property;
pub mod units;

pub use change::{
    BoundingBox, CommandEntry, CommandKind, DoType, LabelChange,
    label_difference_to_label_changes,
};
pub use hierarchy::{HierarchyError, Label, LabelHierarchy, Node};
pub use label_image::{LabelImage, LabelImageError, LayerInfo, Rotation};
pub use photo::Photo;
pub use property::{PropertyInfo, PropertyValue, RegionProperty};
pub use units::{BaseUnit, Unit, Value};
