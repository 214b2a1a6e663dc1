//! One specimen photograph: pixel data plus its named label layers.

use std::collections::HashMap;

use ndarray::Array3;

use crate::model::label_image::{LabelImage, Rotation};

/// A photo with its label layers. The pixel image is optional; it is only
/// needed for property computations, not for label editing.
#[derive(Debug, Clone)]
pub struct Photo {
    name: String,
    /// (height, width) of the photo and every layer raster.
    size: (usize, usize),
    /// RGB pixel data, shape (height, width, 3).
    pub image: Option<Array3<u8>>,
    layers: HashMap<String, LabelImage>,
    /// Pixels per millimetre, when the photo was taken with a known scale.
    pub px_per_mm: Option<f64>,
}

impl Photo {
    pub fn new(name: impl Into<String>, size: (usize, usize)) -> Self {
        Self {
            name: name.into(),
            size,
            image: None,
            layers: HashMap::new(),
            px_per_mm: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// (height, width).
    pub fn size(&self) -> (usize, usize) {
        self.size
    }

    pub fn layer(&self, name: &str) -> Option<&LabelImage> {
        self.layers.get(name)
    }

    pub fn layer_mut(&mut self, name: &str) -> Option<&mut LabelImage> {
        self.layers.get_mut(name)
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str)
    }

    pub fn layers(&self) -> impl Iterator<Item = &LabelImage> {
        self.layers.values()
    }

    pub fn layers_mut(&mut self) -> impl Iterator<Item = &mut LabelImage> {
        self.layers.values_mut()
    }

    /// Insert or replace a layer. The layer raster must match the photo size.
    pub fn insert_layer(&mut self, image: LabelImage) {
        debug_assert_eq!(image.size(), self.size);
        self.layers.insert(image.layer().to_string(), image);
    }

    /// Remove a layer from memory (storage persists it beforehand).
    pub fn remove_layer(&mut self, name: &str) -> Option<LabelImage> {
        self.layers.remove(name)
    }

    /// Names of layers whose pixels are constrained to `name`.
    pub fn dependent_layers(&self, name: &str) -> Vec<String> {
        let mut dependents: Vec<String> = self
            .layers
            .values()
            .filter(|layer| layer.constrain_to() == Some(name))
            .map(|layer| layer.layer().to_string())
            .collect();
        dependents.sort();
        dependents
    }

    /// Structural rotation of the pixel image and every layer.
    ///
    /// Only the edit executor calls this: it owns the undo/redo stacks that
    /// a rotation invalidates.
    pub(crate) fn rotate(&mut self, direction: Rotation) {
        if let Some(image) = &self.image {
            let (rows, cols, channels) = image.dim();
            self.image = Some(match direction {
                Rotation::Clockwise => Array3::from_shape_fn((cols, rows, channels), |(r, c, k)| {
                    image[(rows - 1 - c, r, k)]
                }),
                Rotation::CounterClockwise => {
                    Array3::from_shape_fn((cols, rows, channels), |(r, c, k)| {
                        image[(c, cols - 1 - r, k)]
                    })
                }
            });
        }
        for layer in self.layers.values_mut() {
            layer.rotate(direction);
        }
        self.size = (self.size.1, self.size.0);
        log::debug!("Rotated photo '{}' to {:?}", self.name, self.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::hierarchy::tests::test_hierarchy;
    use crate::model::label_image::LabelImage;
    use std::sync::Arc;

    #[test]
    fn test_dependent_layers() {
        let hierarchy = Arc::new(test_hierarchy());
        let mut photo = Photo::new("IMG_0001", (4, 4));
        photo.insert_layer(LabelImage::empty("Labels", (4, 4), hierarchy.clone(), None));
        photo.insert_layer(LabelImage::empty(
            "Reflections",
            (4, 4),
            hierarchy.clone(),
            Some("Labels".to_string()),
        ));
        assert_eq!(photo.dependent_layers("Labels"), vec!["Reflections"]);
        assert!(photo.dependent_layers("Reflections").is_empty());
    }

    #[test]
    fn test_rotate_swaps_size_and_layers() {
        let hierarchy = Arc::new(test_hierarchy());
        let mut photo = Photo::new("IMG_0001", (2, 3));
        photo.insert_layer(LabelImage::empty("Labels", (2, 3), hierarchy, None));
        photo.image = Some(Array3::zeros((2, 3, 3)));
        photo.rotate(crate::model::label_image::Rotation::Clockwise);
        assert_eq!(photo.size(), (3, 2));
        assert_eq!(photo.layer("Labels").unwrap().size(), (3, 2));
        assert_eq!(photo.image.as_ref().unwrap().dim(), (3, 2, 3));
    }
}
