//! Persistence of label rasters, measurement side-cars and photo pixels.
//!
//! Rasters are stored as `.npy` arrays, one file per photo per layer.
//! Measurements live next to the raster in a `_measurements.json` side-car
//! keyed by hierarchy code; matrix-valued measurements are externalized to
//! their own `.npy` files and referenced by path.

mod local;

pub use local::{LayerGuard, LocalLabelStore};

use thiserror::Error;

use crate::model::hierarchy::HierarchyError;
use crate::model::label_image::LabelImage;
use crate::model::photo::Photo;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read npy array: {0}")]
    ReadNpy(#[from] ndarray_npy::ReadNpyError),

    #[error("failed to write npy array: {0}")]
    WriteNpy(#[from] ndarray_npy::WriteNpyError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),

    #[error("unknown photo '{0}'")]
    UnknownPhoto(String),

    #[error("unknown layer '{0}'")]
    UnknownLayer(String),

    #[error("malformed measurement record in '{file}': {reason}")]
    MalformedRecord { file: String, reason: String },
}

impl StorageError {
    pub fn unknown_photo(name: impl Into<String>) -> Self {
        StorageError::UnknownPhoto(name.into())
    }

    pub fn unknown_layer(name: impl Into<String>) -> Self {
        StorageError::UnknownLayer(name.into())
    }

    pub fn malformed_record(file: impl Into<String>, reason: impl Into<String>) -> Self {
        StorageError::MalformedRecord {
            file: file.into(),
            reason: reason.into(),
        }
    }
}

/// Backend-agnostic access to photos and their label layers.
pub trait LabelStore {
    /// Names of every photo known to the store, sorted.
    fn photo_names(&self) -> Vec<String>;

    /// Load a photo with its pixels and every configured label layer.
    fn load_photo(&self, name: &str) -> Result<Photo, StorageError>;

    /// Load one label layer of a photo. A photo without a stored raster
    /// for the layer yields an all-background layer of the photo's size.
    fn load_layer(&self, photo: &str, layer: &str) -> Result<LabelImage, StorageError>;

    /// Persist one label layer of a photo. Only writes what is dirty and
    /// clears the layer's dirty flags on success.
    fn save_layer(&self, photo: &str, image: &mut LabelImage) -> Result<(), StorageError>;
}
