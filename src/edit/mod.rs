//! Transactional label editing: command execution, constraint enforcement
//! and per-photo undo/redo.

pub mod executor;
pub mod undo;

pub use executor::{EditCommandExecutor, EditError, LayerChanged};
pub use undo::{UndoConfig, UndoRedoStore};
