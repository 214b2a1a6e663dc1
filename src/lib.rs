//! Carapace - label editing and measurement engine for specimen photos.
//!
//! The crate is organized around four concerns:
//!
//! - [`model`]: label hierarchies, per-layer label rasters and the change
//!   records every edit is expressed in.
//! - [`edit`]: the command executor applying change batches with undo/redo
//!   and cross-layer mask constraints.
//! - [`measure`]: region property computations and their batch scheduler.
//! - [`storage`]: folder-backed persistence of rasters, measurements and
//!   photo pixels.

pub mod edit;
pub mod measure;
pub mod model;
pub mod storage;

pub use edit::{EditCommandExecutor, EditError, LayerChanged, UndoConfig};
pub use measure::{BatchRunner, ComputationRegistry, ComputationsScheduler, Job, RegionsCache};
pub use model::{
    CommandEntry, CommandKind, DoType, Label, LabelChange, LabelHierarchy, LabelImage, LayerInfo,
    Photo, PropertyValue, RegionProperty,
};
pub use storage::{LabelStore, LocalLabelStore, StorageError};
