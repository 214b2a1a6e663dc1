//! Per-photo undo/redo stacks.
//!
//! Each stack entry is a *batch* of commands applied together: one user edit
//! may fan out to several dependent layers, and undoing it must revert all
//! of them atomically. Batches stored here are ready to execute; executing a
//! batch from either stack produces the inverse batch for the opposite one.

use crate::model::{CommandEntry, DoType};

/// Configuration for an undo/redo store.
#[derive(Debug, Clone)]
pub struct UndoConfig {
    /// Maximum number of batches kept per stack.
    pub max_history: usize,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self { max_history: 100 }
    }
}

/// The two stacks for one photo.
#[derive(Debug, Clone, Default)]
pub struct UndoRedoStore {
    undo_stack: Vec<Vec<CommandEntry>>,
    redo_stack: Vec<Vec<CommandEntry>>,
    config: UndoConfig,
}

impl UndoRedoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: UndoConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Push a batch onto the stack matching its direction: `Undo` batches
    /// revert a forward action and go onto the undo stack, `Do` batches go
    /// onto the redo stack.
    pub fn push(&mut self, direction: DoType, batch: Vec<CommandEntry>) {
        let stack = match direction {
            DoType::Undo => &mut self.undo_stack,
            DoType::Do => &mut self.redo_stack,
        };
        stack.push(batch);
        while stack.len() > self.config.max_history {
            stack.remove(0);
        }
    }

    pub fn pop_undo(&mut self) -> Option<Vec<CommandEntry>> {
        self.undo_stack.pop()
    }

    pub fn pop_redo(&mut self) -> Option<Vec<CommandEntry>> {
        self.redo_stack.pop()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    /// Drop a fresh edit's alternate future.
    pub fn clear_redo(&mut self) {
        self.redo_stack.clear();
    }

    /// Clear both stacks. Required after structural transforms, when stored
    /// pixel coordinates no longer address the raster.
    pub fn clear(&mut self) {
        if self.can_undo() || self.can_redo() {
            log::debug!("Cleared undo/redo history");
        }
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}
