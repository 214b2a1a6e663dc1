//! Per-batch cache of region bounding boxes, masks and pixel crops.
//!
//! Built once per photo per batch run and shared by every property
//! computation in that run. The cache must not outlive the batch: its crops
//! are copies taken at construction and are not informed of later raster
//! mutations.

use std::collections::{BTreeSet, HashMap};

use ndarray::{Array2, Array3, s};

use crate::model::change::BoundingBox;
use crate::model::hierarchy::Label;
use crate::model::photo::Photo;

/// Cached data for one label within one photo.
#[derive(Debug, Clone)]
pub struct Region {
    pub label: Label,
    /// Tight bounding box of the region's mask.
    pub bbox: BoundingBox,
    /// Region mask cropped to `bbox`.
    pub mask: Array2<bool>,
    /// Photo pixels cropped to `bbox` (zeros when the photo carries no
    /// pixel data).
    pub image: Array3<u8>,
}

/// Auxiliary derived data shared between computations within one batch,
/// keyed by a computation-chosen string. Entries are never invalidated
/// within the cache's lifetime.
#[derive(Debug, Clone)]
pub enum SharedData {
    /// One float plane, e.g. a grayscale conversion.
    Plane(Array2<f64>),
    /// Full-size multi-channel float image, e.g. an HSV conversion.
    Image(Array3<f64>),
}

/// Amortizes region extraction across many property computations.
#[derive(Debug)]
pub struct RegionsCache {
    /// Layer the regions were extracted from.
    pub layer: String,
    /// label -> cached region. A label absent from the photo simply has no
    /// entry; consumers skip it silently.
    pub regions: HashMap<Label, Region>,
    /// Cross-computation memo table.
    pub data_storage: HashMap<String, SharedData>,
}

impl RegionsCache {
    /// Build the cache for the given labels from one photo layer.
    ///
    /// Labels without any pixels in the raster get no entry; unknown layers
    /// yield an empty cache.
    pub fn new(labels: &BTreeSet<Label>, photo: &Photo, layer: &str) -> Self {
        let mut regions = HashMap::new();
        if let Some(label_image) = photo.layer(layer) {
            for &label in labels {
                let mask = label_image.mask_for(label);
                let Some(bbox) = bbox_of_mask(&mask) else {
                    continue;
                };
                let cropped_mask = mask
                    .slice(s![bbox.top..=bbox.bottom, bbox.left..=bbox.right])
                    .to_owned();
                let image = match &photo.image {
                    Some(image) => image
                        .slice(s![bbox.top..=bbox.bottom, bbox.left..=bbox.right, ..])
                        .to_owned(),
                    None => Array3::zeros((bbox.height(), bbox.width(), 3)),
                };
                regions.insert(
                    label,
                    Region {
                        label,
                        bbox,
                        mask: cropped_mask,
                        image,
                    },
                );
            }
        } else {
            log::warn!(
                "RegionsCache: photo '{}' has no layer '{}'",
                photo.name(),
                layer
            );
        }
        log::debug!(
            "RegionsCache for '{}': {} of {} labels present",
            photo.name(),
            regions.len(),
            labels.len()
        );
        Self {
            layer: layer.to_string(),
            regions,
            data_storage: HashMap::new(),
        }
    }

    pub fn region(&self, label: Label) -> Option<&Region> {
        self.regions.get(&label)
    }
}

/// Bounding box of the true pixels, `None` for an all-false mask.
fn bbox_of_mask(mask: &Array2<bool>) -> Option<BoundingBox> {
    let mut bbox: Option<BoundingBox> = None;
    for ((row, col), &set) in mask.indexed_iter() {
        if !set {
            continue;
        }
        bbox = Some(match bbox {
            None => BoundingBox {
                top: row,
                left: col,
                bottom: row,
                right: col,
            },
            Some(b) => BoundingBox {
                top: b.top.min(row),
                left: b.left.min(col),
                bottom: b.bottom.max(row),
                right: b.right.max(col),
            },
        });
    }
    bbox
}
