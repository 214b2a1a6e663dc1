//! Applies edit commands to a photo's label layers and owns the per-photo
//! undo/redo stacks.
//!
//! The executor is single-threaded and synchronous: every command batch is
//! applied atomically with respect to the caller, and callers serialize
//! edits to one photo. It takes the photo and layer explicitly rather than
//! reading any ambient state.

use std::collections::{BTreeMap, HashMap};

use ndarray::Array2;
use thiserror::Error;

use crate::edit::undo::{UndoConfig, UndoRedoStore};
use crate::model::change::{CommandEntry, CommandKind, LabelChange};
use crate::model::hierarchy::Label;
use crate::model::label_image::{LabelImageError, Rotation};
use crate::model::photo::Photo;

/// Errors from command application.
#[derive(Error, Debug)]
pub enum EditError {
    /// Command addressed a layer the photo does not carry
    #[error("photo '{photo}' has no layer '{layer}'")]
    UnknownLayer { photo: String, layer: String },

    /// Raster replacement failed (programming error, not retried)
    #[error(transparent)]
    LabelImage(#[from] LabelImageError),
}

/// Structured change notification returned to the caller, which decides how
/// to dispatch it (UI refresh, persistence, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerChanged {
    pub photo: String,
    pub layer: String,
}

/// Per-layer dependency record: constraint layer plus the constraint
/// timestamp last reconciled against.
#[derive(Debug, Clone)]
struct Dependency {
    constraint: String,
    last_observed: u64,
}

/// Executes [`CommandEntry`] batches and keeps dependent layers consistent.
pub struct EditCommandExecutor {
    /// photo name -> dependent layer name -> dependency record.
    dependencies: HashMap<String, HashMap<String, Dependency>>,
    stores: HashMap<String, UndoRedoStore>,
    undo_config: UndoConfig,
}

impl Default for EditCommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl EditCommandExecutor {
    pub fn new() -> Self {
        Self::with_config(UndoConfig::default())
    }

    pub fn with_config(undo_config: UndoConfig) -> Self {
        Self {
            dependencies: HashMap::new(),
            stores: HashMap::new(),
            undo_config,
        }
    }

    /// Record the layer dependencies of a photo, observing the constraint
    /// layers' current timestamps.
    pub fn register_photo(&mut self, photo: &Photo) {
        let mut deps = HashMap::new();
        for layer in photo.layers() {
            if let Some(constraint) = layer.constrain_to() {
                if let Some(constraint_layer) = photo.layer(constraint) {
                    deps.insert(
                        layer.layer().to_string(),
                        Dependency {
                            constraint: constraint.to_string(),
                            last_observed: constraint_layer.timestamp(),
                        },
                    );
                }
            }
        }
        log::debug!(
            "Registered photo '{}' with {} layer dependencies",
            photo.name(),
            deps.len()
        );
        self.dependencies.insert(photo.name().to_string(), deps);
    }

    fn store_mut(&mut self, photo: &str) -> &mut UndoRedoStore {
        self.stores
            .entry(photo.to_string())
            .or_insert_with(|| UndoRedoStore::with_config(self.undo_config.clone()))
    }

    pub fn can_undo(&self, photo: &str) -> bool {
        self.stores.get(photo).is_some_and(UndoRedoStore::can_undo)
    }

    pub fn can_redo(&self, photo: &str) -> bool {
        self.stores.get(photo).is_some_and(UndoRedoStore::can_redo)
    }

    /// Drop the undo/redo history of a photo.
    pub fn clear_history(&mut self, photo: &str) {
        if let Some(store) = self.stores.get_mut(photo) {
            store.clear();
        }
    }

    /// Apply one user edit: the command plus, when it shrinks a layer other
    /// layers are constrained to, the propagated clearing commands, all in
    /// one undo batch.
    pub fn apply_edit(
        &mut self,
        photo: &mut Photo,
        command: CommandEntry,
    ) -> Result<Vec<LayerChanged>, EditError> {
        let mut batch = if command.kind == CommandKind::Relabel {
            self.propagate_mask_changes_to(photo, &command.layer, &command)
        } else {
            Vec::new()
        };
        batch.insert(0, command);
        let notifications = self.apply_batch(photo, batch, true)?;
        self.observe_constraints(photo);
        Ok(notifications)
    }

    /// Apply a batch of commands as one undoable unit. Fresh edits clear the
    /// redo stack; use [`Self::undo`]/[`Self::redo`] to walk history.
    pub fn do_commands(
        &mut self,
        photo: &mut Photo,
        batch: Vec<CommandEntry>,
    ) -> Result<Vec<LayerChanged>, EditError> {
        self.apply_batch(photo, batch, true)
    }

    /// Revert the most recent batch. A no-op on an empty stack.
    pub fn undo(&mut self, photo: &mut Photo) -> Result<Vec<LayerChanged>, EditError> {
        let Some(batch) = self.store_mut(photo.name()).pop_undo() else {
            return Ok(Vec::new());
        };
        self.apply_batch(photo, batch, false)
    }

    /// Re-apply the most recently undone batch. A no-op on an empty stack.
    pub fn redo(&mut self, photo: &mut Photo) -> Result<Vec<LayerChanged>, EditError> {
        let Some(batch) = self.store_mut(photo.name()).pop_redo() else {
            return Ok(Vec::new());
        };
        self.apply_batch(photo, batch, false)
    }

    fn apply_batch(
        &mut self,
        photo: &mut Photo,
        batch: Vec<CommandEntry>,
        fresh: bool,
    ) -> Result<Vec<LayerChanged>, EditError> {
        let mut reverse_batch = Vec::new();
        let mut structural = false;
        let mut notifications: Vec<LayerChanged> = Vec::new();

        for command in &batch {
            match self.do_command(photo, command)? {
                Some(reverse) => {
                    let note = LayerChanged {
                        photo: photo.name().to_string(),
                        layer: reverse.layer.clone(),
                    };
                    if !notifications.contains(&note) {
                        notifications.push(note);
                    }
                    reverse_batch.push(reverse);
                }
                None if command.kind != CommandKind::Relabel => {
                    structural = true;
                    for layer in photo.layer_names() {
                        notifications.push(LayerChanged {
                            photo: photo.name().to_string(),
                            layer: layer.to_string(),
                        });
                    }
                }
                // Relabel command fully filtered away; nothing happened.
                None => {}
            }
        }

        if structural {
            // Stored pixel coordinates no longer address the raster.
            self.store_mut(photo.name()).clear();
            self.observe_constraints(photo);
            return Ok(notifications);
        }

        if reverse_batch.is_empty() {
            return Ok(notifications);
        }
        let direction = reverse_batch[0].do_type;
        let store = self.store_mut(photo.name());
        store.push(direction, reverse_batch);
        if fresh {
            store.clear_redo();
        }
        Ok(notifications)
    }

    /// Apply one command; returns the inverse command, or `None` when the
    /// command was structural or filtered down to nothing.
    fn do_command(
        &mut self,
        photo: &mut Photo,
        command: &CommandEntry,
    ) -> Result<Option<CommandEntry>, EditError> {
        match command.kind {
            CommandKind::Rot90Cw => {
                photo.rotate(Rotation::Clockwise);
                return Ok(None);
            }
            CommandKind::Rot90Ccw => {
                photo.rotate(Rotation::CounterClockwise);
                return Ok(None);
            }
            CommandKind::Relabel => {}
        }

        let constraint_mask = self.constraint_mask(photo, &command.layer)?;
        let photo_name = photo.name().to_string();
        let target = photo
            .layer_mut(&command.layer)
            .ok_or_else(|| EditError::UnknownLayer {
                photo: photo_name,
                layer: command.layer.clone(),
            })?;

        let mut reverse_changes = Vec::new();
        for change in &command.changes {
            let mut filtered = change.clone();
            // Pixels outside the allowed mask are silently dropped. Clears
            // to background always stay within bounds and skip the filter;
            // a propagated clear must still apply after the mask it depends
            // on shrank earlier in the same batch.
            if change.new_label != 0 {
                if let Some(mask) = &constraint_mask {
                    filtered.retain_coords(|row, col| mask[(row, col)]);
                }
            }
            if filtered.is_empty() {
                continue;
            }
            target.apply_change(&filtered);
            reverse_changes.push(filtered.invert());
        }
        if reverse_changes.is_empty() {
            return Ok(None);
        }
        // Reverse order so overlapping changes unwind correctly.
        reverse_changes.reverse();
        let mut reverse = CommandEntry::relabel(command.layer.clone(), reverse_changes);
        reverse.do_type = command.do_type.invert();
        Ok(Some(reverse))
    }

    /// The mask a layer's edits must stay within, if the layer is
    /// constrained: the constraint layer's mask-label region.
    fn constraint_mask(
        &self,
        photo: &Photo,
        layer: &str,
    ) -> Result<Option<Array2<bool>>, EditError> {
        let target = photo.layer(layer).ok_or_else(|| EditError::UnknownLayer {
            photo: photo.name().to_string(),
            layer: layer.to_string(),
        })?;
        let Some(constraint) = target.constrain_to() else {
            return Ok(None);
        };
        let constraint_layer =
            photo
                .layer(constraint)
                .ok_or_else(|| EditError::UnknownLayer {
                    photo: photo.name().to_string(),
                    layer: constraint.to_string(),
                })?;
        let mask_label = constraint_layer.hierarchy().mask_label();
        Ok(Some(constraint_layer.mask_for(mask_label)))
    }

    /// Reconcile a dependent layer with its constraint layer if the
    /// constraint changed since the last reconciliation. Afterwards every
    /// nonzero pixel of the layer lies within the constraint mask.
    ///
    /// Returns whether any out-of-mask pixels were cleared.
    pub fn enforce_within_mask(
        &mut self,
        photo: &mut Photo,
        layer: &str,
    ) -> Result<bool, EditError> {
        let Some(dep) = self
            .dependencies
            .get(photo.name())
            .and_then(|deps| deps.get(layer))
            .cloned()
        else {
            return Ok(false);
        };
        let constraint_layer =
            photo
                .layer(&dep.constraint)
                .ok_or_else(|| EditError::UnknownLayer {
                    photo: photo.name().to_string(),
                    layer: dep.constraint.clone(),
                })?;
        let constraint_ts = constraint_layer.timestamp();
        if constraint_ts <= dep.last_observed {
            return Ok(false);
        }
        let mask_label = constraint_layer.hierarchy().mask_label();
        let mask = constraint_layer.mask_for(mask_label);

        let photo_name = photo.name().to_string();
        let target = photo.layer_mut(layer).ok_or_else(|| EditError::UnknownLayer {
            photo: photo_name,
            layer: layer.to_string(),
        })?;
        let violated = target
            .raster()
            .indexed_iter()
            .any(|((row, col), &value)| value != 0 && !mask[(row, col)]);
        if violated {
            let reconciled = ndarray::Zip::from(target.raster())
                .and(&mask)
                .map_collect(|&value, &keep| if keep { value } else { 0 });
            target.set_raster(reconciled)?;
        }

        if let Some(deps) = self.dependencies.get_mut(photo.name()) {
            if let Some(dep) = deps.get_mut(layer) {
                dep.last_observed = constraint_ts;
            }
        }
        if violated {
            log::debug!(
                "Enforced mask constraint on '{}'/'{}' against '{}'",
                photo.name(),
                layer,
                dep.constraint
            );
        }
        Ok(violated)
    }

    /// Commands clearing, in every layer constrained to `mask_layer`, the
    /// pixels that `command` removes from the mask-label region (clears to
    /// background as well as relabelings out of the mask subtree), grouped
    /// by the dependent layer's current label so undo restores each pixel
    /// individually.
    pub fn propagate_mask_changes_to(
        &self,
        photo: &Photo,
        mask_layer: &str,
        command: &CommandEntry,
    ) -> Vec<CommandEntry> {
        let Some(source) = photo.layer(mask_layer) else {
            return Vec::new();
        };
        let hierarchy = source.hierarchy();
        let mask_label = hierarchy.mask_label();
        let in_mask = |label: Label| {
            label == mask_label || hierarchy.is_descendant_of(label, mask_label)
        };
        let lost: Vec<(usize, usize)> = command
            .changes
            .iter()
            .filter(|change| in_mask(change.old_label) && !in_mask(change.new_label))
            .flat_map(|change| change.coords.iter().copied())
            .collect();
        if lost.is_empty() {
            return Vec::new();
        }

        let mut propagated = Vec::new();
        for dependent in photo.dependent_layers(mask_layer) {
            let Some(layer) = photo.layer(&dependent) else {
                continue;
            };
            let mut groups: BTreeMap<Label, Vec<(usize, usize)>> = BTreeMap::new();
            for &(row, col) in &lost {
                let current = layer.raster()[(row, col)];
                if current != 0 {
                    groups.entry(current).or_default().push((row, col));
                }
            }
            if groups.is_empty() {
                continue;
            }
            let changes: Vec<LabelChange> = groups
                .into_iter()
                .map(|(old, coords)| LabelChange::new(coords, old, 0, dependent.clone()))
                .collect();
            log::debug!(
                "Propagating mask shrink to '{}' ({} changes)",
                dependent,
                changes.len()
            );
            propagated.push(CommandEntry::relabel(dependent, changes));
        }
        propagated
    }

    /// Record the constraint layers' current timestamps as reconciled.
    fn observe_constraints(&mut self, photo: &Photo) {
        if let Some(deps) = self.dependencies.get_mut(photo.name()) {
            for dep in deps.values_mut() {
                if let Some(constraint_layer) = photo.layer(&dep.constraint) {
                    dep.last_observed = constraint_layer.timestamp();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::hierarchy::LabelHierarchy;
    use crate::model::label_image::LabelImage;
    use ndarray::Array2;
    use std::sync::Arc;

    /// Flat hierarchy with labels 1, 2, 3; label 1 is the mask label.
    fn flat_hierarchy() -> Arc<LabelHierarchy> {
        Arc::new(
            LabelHierarchy::from_json(
                r#"{
                    "levels": [{"name": "regions", "bits": 8}],
                    "mask_label": 1,
                    "labels": [
                        {"label": 1, "name": "Bug", "color": [200, 0, 0]},
                        {"label": 2, "name": "Other", "color": [0, 200, 0]},
                        {"label": 3, "name": "Third", "color": [0, 0, 200]}
                    ]
                }"#,
            )
            .unwrap(),
        )
    }

    fn photo_10x10() -> Photo {
        let _ = env_logger::builder().is_test(true).try_init();
        let hierarchy = flat_hierarchy();
        let mut raster = Array2::<u32>::zeros((10, 10));
        for row in 0..5 {
            for col in 0..10 {
                raster[(row, col)] = 1;
            }
        }
        for col in 0..5 {
            raster[(7, col)] = 2;
        }
        let mut photo = Photo::new("IMG_0001", (10, 10));
        photo.insert_layer(LabelImage::from_raster("Labels", raster, hierarchy, None));
        photo
    }

    fn paint_command(photo: &Photo, from: u32, to: u32) -> CommandEntry {
        let raster = photo.layer("Labels").unwrap().raster();
        let coords: Vec<(usize, usize)> = raster
            .indexed_iter()
            .filter(|&(_, &v)| v == from)
            .map(|(idx, _)| idx)
            .collect();
        CommandEntry::relabel("Labels", vec![LabelChange::new(coords, from, to, "Labels")])
    }

    #[test]
    fn test_do_undo_redo_roundtrip() {
        let mut photo = photo_10x10();
        let mut executor = EditCommandExecutor::new();
        executor.register_photo(&photo);
        let original = photo.layer("Labels").unwrap().raster().clone();

        let command = paint_command(&photo, 1, 2);
        let notes = executor.apply_edit(&mut photo, command).unwrap();
        assert_eq!(notes.len(), 1);
        let painted = photo.layer("Labels").unwrap().raster().clone();
        assert!(painted.iter().all(|&v| v != 1));
        assert!(executor.can_undo("IMG_0001"));

        executor.undo(&mut photo).unwrap();
        assert_eq!(photo.layer("Labels").unwrap().raster(), &original);
        assert!(executor.can_redo("IMG_0001"));
        assert!(!executor.can_undo("IMG_0001"));

        executor.redo(&mut photo).unwrap();
        assert_eq!(photo.layer("Labels").unwrap().raster(), &painted);
        assert!(executor.can_undo("IMG_0001"));
        assert!(!executor.can_redo("IMG_0001"));
    }

    #[test]
    fn test_fresh_edit_clears_redo() {
        let mut photo = photo_10x10();
        let mut executor = EditCommandExecutor::new();
        executor.register_photo(&photo);

        let command = paint_command(&photo, 1, 2);
        executor.apply_edit(&mut photo, command).unwrap();
        executor.undo(&mut photo).unwrap();
        assert!(executor.can_redo("IMG_0001"));
        let command = paint_command(&photo, 2, 3);
        executor.apply_edit(&mut photo, command).unwrap();
        assert!(!executor.can_redo("IMG_0001"));
    }

    #[test]
    fn test_undo_on_empty_stack_is_noop() {
        let mut photo = photo_10x10();
        let mut executor = EditCommandExecutor::new();
        executor.register_photo(&photo);
        let original = photo.layer("Labels").unwrap().raster().clone();
        assert!(executor.undo(&mut photo).unwrap().is_empty());
        assert!(executor.redo(&mut photo).unwrap().is_empty());
        assert_eq!(photo.layer("Labels").unwrap().raster(), &original);
    }

    fn photo_with_reflections() -> Photo {
        let _ = env_logger::builder().is_test(true).try_init();
        let hierarchy = flat_hierarchy();
        let mut labels = Array2::<u32>::zeros((6, 6));
        for row in 0..4 {
            for col in 0..4 {
                labels[(row, col)] = 1;
            }
        }
        let mut reflections = Array2::<u32>::zeros((6, 6));
        reflections[(0, 0)] = 2;
        reflections[(1, 1)] = 2;
        let mut photo = Photo::new("IMG_0002", (6, 6));
        photo.insert_layer(LabelImage::from_raster(
            "Labels",
            labels,
            hierarchy.clone(),
            None,
        ));
        photo.insert_layer(LabelImage::from_raster(
            "Reflections",
            reflections,
            hierarchy,
            Some("Labels".to_string()),
        ));
        photo
    }

    #[test]
    fn test_constrained_edit_is_filtered_against_mask() {
        let mut photo = photo_with_reflections();
        let mut executor = EditCommandExecutor::new();
        executor.register_photo(&photo);

        // Paint reflections both inside and outside the Labels mask; the
        // outside part must be silently dropped.
        let command = CommandEntry::relabel(
            "Reflections",
            vec![LabelChange::new(
                vec![(2, 2), (5, 5)],
                0,
                2,
                "Reflections",
            )],
        );
        executor.apply_edit(&mut photo, command).unwrap();
        let raster = photo.layer("Reflections").unwrap().raster();
        assert_eq!(raster[(2, 2)], 2);
        assert_eq!(raster[(5, 5)], 0);
    }

    #[test]
    fn test_fully_filtered_edit_pushes_nothing() {
        let mut photo = photo_with_reflections();
        let mut executor = EditCommandExecutor::new();
        executor.register_photo(&photo);

        let command = CommandEntry::relabel(
            "Reflections",
            vec![LabelChange::new(vec![(5, 5)], 0, 2, "Reflections")],
        );
        let notes = executor.apply_edit(&mut photo, command).unwrap();
        assert!(notes.is_empty());
        assert!(!executor.can_undo("IMG_0002"));
    }

    #[test]
    fn test_enforce_within_mask() {
        let mut photo = photo_with_reflections();
        let mut executor = EditCommandExecutor::new();
        executor.register_photo(&photo);

        // Shrink the Labels mask behind the executor's back, then reconcile.
        let mut raster = photo.layer("Labels").unwrap().raster().clone();
        raster[(0, 0)] = 0;
        raster[(1, 1)] = 0;
        photo
            .layer_mut("Labels")
            .unwrap()
            .set_raster(raster)
            .unwrap();

        assert!(executor.enforce_within_mask(&mut photo, "Reflections").unwrap());
        let reflections = photo.layer("Reflections").unwrap();
        let mask = photo.layer("Labels").unwrap().mask_for(1);
        for ((row, col), &value) in reflections.raster().indexed_iter() {
            if value != 0 {
                assert!(mask[(row, col)]);
            }
        }
        // Second call: timestamps already reconciled, nothing to do.
        assert!(!executor.enforce_within_mask(&mut photo, "Reflections").unwrap());
    }

    #[test]
    fn test_mask_shrink_propagates_and_undoes_atomically() {
        let mut photo = photo_with_reflections();
        let mut executor = EditCommandExecutor::new();
        executor.register_photo(&photo);
        let labels_before = photo.layer("Labels").unwrap().raster().clone();
        let reflections_before = photo.layer("Reflections").unwrap().raster().clone();

        // Erase the mask cells (0,0) and (1,1); (1,1) holds a reflection.
        let command = CommandEntry::relabel(
            "Labels",
            vec![LabelChange::new(vec![(0, 0), (1, 1)], 1, 0, "Labels")],
        );
        let notes = executor.apply_edit(&mut photo, command).unwrap();
        assert_eq!(notes.len(), 2);

        let reflections = photo.layer("Reflections").unwrap().raster();
        assert_eq!(reflections[(0, 0)], 0);
        assert_eq!(reflections[(1, 1)], 0);
        // Only the shrunk coordinates were cleared.
        let unchanged: Vec<_> = reflections_before
            .indexed_iter()
            .filter(|((r, c), _)| !((*r, *c) == (0, 0) || (*r, *c) == (1, 1)))
            .collect();
        for ((row, col), &value) in unchanged {
            assert_eq!(reflections[(row, col)], value);
        }

        // One undo restores both layers.
        executor.undo(&mut photo).unwrap();
        assert_eq!(photo.layer("Labels").unwrap().raster(), &labels_before);
        assert_eq!(
            photo.layer("Reflections").unwrap().raster(),
            &reflections_before
        );
    }

    #[test]
    fn test_mask_shrink_leaves_no_residual_violation() {
        let mut photo = photo_with_reflections();
        let mut executor = EditCommandExecutor::new();
        executor.register_photo(&photo);

        let command = CommandEntry::relabel(
            "Labels",
            vec![LabelChange::new(vec![(1, 1)], 1, 0, "Labels")],
        );
        executor.apply_edit(&mut photo, command).unwrap();
        assert_eq!(photo.layer("Reflections").unwrap().raster()[(1, 1)], 0);

        // Propagation already cleared the dependent pixel; the reconciler
        // must find nothing left to repair.
        assert!(!executor.enforce_within_mask(&mut photo, "Reflections").unwrap());
        let mask = photo.layer("Labels").unwrap().mask_for(1);
        for ((row, col), &value) in
            photo.layer("Reflections").unwrap().raster().indexed_iter()
        {
            if value != 0 {
                assert!(mask[(row, col)]);
            }
        }
    }

    #[test]
    fn test_rotation_clears_stacks() {
        let mut photo = photo_10x10();
        let mut executor = EditCommandExecutor::new();
        executor.register_photo(&photo);
        let command = paint_command(&photo, 1, 2);
        executor.apply_edit(&mut photo, command).unwrap();
        assert!(executor.can_undo("IMG_0001"));

        let notes = executor
            .apply_edit(&mut photo, CommandEntry::rotation(CommandKind::Rot90Cw))
            .unwrap();
        assert!(!notes.is_empty());
        assert!(!executor.can_undo("IMG_0001"));
        assert!(!executor.can_redo("IMG_0001"));
        assert_eq!(photo.size(), (10, 10));
    }

    #[test]
    fn test_unknown_layer_is_an_error() {
        let mut photo = photo_10x10();
        let mut executor = EditCommandExecutor::new();
        executor.register_photo(&photo);
        let command = CommandEntry::relabel(
            "Nonexistent",
            vec![LabelChange::new(vec![(0, 0)], 0, 1, "Nonexistent")],
        );
        assert!(matches!(
            executor.do_commands(&mut photo, vec![command]),
            Err(EditError::UnknownLayer { .. })
        ));
    }
}
