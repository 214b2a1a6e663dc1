//! Folder-backed label store.
//!
//! Layout under the project root:
//!
//! ```text
//! <root>/images/<photo file>           photo pixels (any common format)
//! <root>/<layer>/<photo>.npy           u32 label raster
//! <root>/<layer>/<photo>_measurements.json
//! <root>/<layer>/<photo>_<key>_<label>.npy   externalized matrix values
//! <root>/scales.json                   optional photo -> px-per-mm map
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::model::hierarchy::{Label, LabelHierarchy};
use crate::model::label_image::{LabelImage, LayerInfo};
use crate::model::photo::Photo;
use crate::model::property::{PropertyInfo, PropertyValue, RegionProperty};
use crate::model::units::Unit;
use crate::storage::{LabelStore, StorageError};

/// Image file extensions the store recognizes when scanning `images/`.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

const SCALES_FILE: &str = "scales.json";

#[derive(Debug, Clone)]
struct PhotoEntry {
    /// Path of the pixel file under `images/`.
    file: PathBuf,
    /// (height, width).
    size: (usize, usize),
    px_per_mm: Option<f64>,
}

/// Store over a local project folder.
#[derive(Debug, Clone)]
pub struct LocalLabelStore {
    root: PathBuf,
    hierarchy: Arc<LabelHierarchy>,
    layers: Vec<LayerInfo>,
    photos: BTreeMap<String, PhotoEntry>,
}

impl LocalLabelStore {
    /// Open a project folder, scanning `images/` for photos. Photo names
    /// are file stems; dimensions are read from the image headers.
    pub fn open(
        root: impl Into<PathBuf>,
        hierarchy: Arc<LabelHierarchy>,
        layers: Vec<LayerInfo>,
    ) -> Result<Self, StorageError> {
        let root = root.into();
        let scales = read_scales(&root.join(SCALES_FILE))?;
        let mut photos = BTreeMap::new();
        let images_dir = root.join("images");
        if images_dir.is_dir() {
            for entry in fs::read_dir(&images_dir)? {
                let path = entry?.path();
                let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                    continue;
                };
                if !IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let (width, height) = image::image_dimensions(&path)?;
                photos.insert(
                    stem.to_string(),
                    PhotoEntry {
                        file: path.clone(),
                        size: (height as usize, width as usize),
                        px_per_mm: scales.get(stem).copied(),
                    },
                );
            }
        }
        log::info!(
            "Opened project at {:?}: {} photos, {} layers",
            root,
            photos.len(),
            layers.len()
        );
        Ok(Self {
            root,
            hierarchy,
            layers,
            photos,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn hierarchy(&self) -> &Arc<LabelHierarchy> {
        &self.hierarchy
    }

    pub fn layer_infos(&self) -> &[LayerInfo] {
        &self.layers
    }

    /// Load a layer and hand out a guard that persists it when released.
    pub fn acquire(&self, photo: &str, layer: &str) -> Result<LayerGuard<'_>, StorageError> {
        let image = self.load_layer(photo, layer)?;
        Ok(LayerGuard {
            store: self,
            photo: photo.to_string(),
            image: Some(image),
        })
    }

    fn entry(&self, photo: &str) -> Result<&PhotoEntry, StorageError> {
        self.photos
            .get(photo)
            .ok_or_else(|| StorageError::unknown_photo(photo))
    }

    fn layer_info(&self, layer: &str) -> Result<&LayerInfo, StorageError> {
        self.layers
            .iter()
            .find(|info| info.name == layer)
            .ok_or_else(|| StorageError::unknown_layer(layer))
    }

    fn raster_path(&self, photo: &str, layer: &str) -> PathBuf {
        self.root.join(layer).join(format!("{photo}.npy"))
    }

    fn measurements_path(&self, photo: &str, layer: &str) -> PathBuf {
        self.root
            .join(layer)
            .join(format!("{photo}_measurements.json"))
    }

    fn load_measurements(
        &self,
        photo: &str,
        layer: &str,
    ) -> Result<Vec<RegionProperty>, StorageError> {
        let path = self.measurements_path(photo, layer);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file_name = path.display().to_string();
        let text = fs::read_to_string(&path)?;
        let parsed: MeasurementsFile = serde_json::from_str(&text)?;
        let layer_dir = self.root.join(layer);
        let mut props = Vec::new();
        for (code, group) in parsed {
            // Codes must resolve in the current hierarchy; a stale side-car
            // written against another hierarchy is an error, not silence.
            let label = self.hierarchy.label(&code)?;
            for record in group.measurements {
                if record.label != label {
                    return Err(StorageError::malformed_record(
                        &file_name,
                        format!("record label {} under code '{}'", record.label, code),
                    ));
                }
                props.push(record.into_property(&layer_dir, &file_name)?);
            }
        }
        Ok(props)
    }

    fn save_measurements(
        &self,
        photo: &str,
        layer: &str,
        props: &HashMap<Label, HashMap<String, RegionProperty>>,
    ) -> Result<(), StorageError> {
        let layer_dir = self.root.join(layer);
        let mut file = MeasurementsFile::new();
        for (&label, by_key) in props {
            let code = self.hierarchy.code(label)?;
            let mut records = Vec::new();
            let mut keys: Vec<&String> = by_key.keys().collect();
            keys.sort();
            for key in keys {
                let prop = &by_key[key];
                records.push(MeasurementRecord::from_property(
                    prop, photo, &layer_dir,
                )?);
            }
            file.insert(code, MeasurementGroup {
                measurements: records,
            });
        }
        let text = serde_json::to_string_pretty(&file)?;
        fs::write(self.measurements_path(photo, layer), text)?;
        Ok(())
    }
}

impl LabelStore for LocalLabelStore {
    fn photo_names(&self) -> Vec<String> {
        self.photos.keys().cloned().collect()
    }

    fn load_photo(&self, name: &str) -> Result<Photo, StorageError> {
        let entry = self.entry(name)?;
        let mut photo = Photo::new(name, entry.size);
        photo.px_per_mm = entry.px_per_mm;
        photo.image = Some(read_rgb(&entry.file)?);
        for info in &self.layers {
            let layer = self.load_layer(name, &info.name)?;
            photo.insert_layer(layer);
        }
        Ok(photo)
    }

    fn load_layer(&self, photo: &str, layer: &str) -> Result<LabelImage, StorageError> {
        let entry = self.entry(photo)?;
        let info = self.layer_info(layer)?;
        let path = self.raster_path(photo, layer);
        let raster: Array2<Label> = if path.exists() {
            ndarray_npy::read_npy(&path)?
        } else {
            Array2::zeros(entry.size)
        };
        let mut image = LabelImage::from_raster(
            &info.name,
            raster,
            self.hierarchy.clone(),
            info.constrain_to.clone(),
        );
        image.load_region_props(self.load_measurements(photo, layer)?);
        Ok(image)
    }

    fn save_layer(&self, photo: &str, image: &mut LabelImage) -> Result<(), StorageError> {
        self.entry(photo)?;
        let layer = image.layer().to_string();
        if !image.is_dirty() && !image.props_dirty() {
            return Ok(());
        }
        fs::create_dir_all(self.root.join(&layer))?;
        if image.is_dirty() {
            ndarray_npy::write_npy(self.raster_path(photo, &layer), image.raster())?;
        }
        self.save_measurements(photo, &layer, image.region_props())?;
        image.mark_saved();
        log::debug!("Persisted layer '{}' of photo '{}'", layer, photo);
        Ok(())
    }
}

/// Loaded layer that writes itself back when it goes out of scope.
///
/// Prefer [`LayerGuard::release`] to surface write errors; `Drop` can only
/// log them.
pub struct LayerGuard<'a> {
    store: &'a LocalLabelStore,
    photo: String,
    image: Option<LabelImage>,
}

impl LayerGuard<'_> {
    pub fn photo(&self) -> &str {
        &self.photo
    }

    /// Persist and consume the guard, reporting any write error.
    pub fn release(mut self) -> Result<(), StorageError> {
        match self.image.take() {
            Some(mut image) => self.store.save_layer(&self.photo, &mut image),
            None => Ok(()),
        }
    }
}

impl Deref for LayerGuard<'_> {
    type Target = LabelImage;

    fn deref(&self) -> &LabelImage {
        self.image.as_ref().expect("guard not yet released")
    }
}

impl DerefMut for LayerGuard<'_> {
    fn deref_mut(&mut self) -> &mut LabelImage {
        self.image.as_mut().expect("guard not yet released")
    }
}

impl Drop for LayerGuard<'_> {
    fn drop(&mut self) {
        if let Some(mut image) = self.image.take() {
            if let Err(err) = self.store.save_layer(&self.photo, &mut image) {
                log::error!(
                    "Failed to persist layer '{}' of photo '{}': {}",
                    image.layer(),
                    self.photo,
                    err
                );
            }
        }
    }
}

fn read_scales(path: &Path) -> Result<HashMap<String, f64>, StorageError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Decode a photo file into an `(height, width, 3)` RGB array.
fn read_rgb(path: &Path) -> Result<Array3<u8>, StorageError> {
    let rgb = image::open(path)?.to_rgb8();
    let (width, height) = rgb.dimensions();
    let array = Array3::from_shape_vec(
        (height as usize, width as usize, 3),
        rgb.into_raw(),
    )?;
    Ok(array)
}

type MeasurementsFile = BTreeMap<String, MeasurementGroup>;

#[derive(Debug, Serialize, Deserialize)]
struct MeasurementGroup {
    measurements: Vec<MeasurementRecord>,
}

/// One serialized measurement, as stored in the side-car.
#[derive(Debug, Serialize, Deserialize)]
struct MeasurementRecord {
    name: String,
    label: Label,
    value: serde_json::Value,
    prop_type: String,
    num_vals: usize,
    val_names: Vec<String>,
    col_names: Vec<String>,
    row_names: Vec<String>,
    key: String,
    description: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ScalarRecord {
    raw: f64,
    unit: Unit,
}

#[derive(Debug, Serialize, Deserialize)]
struct VectorRecord {
    values: Vec<f64>,
    unit: Unit,
}

/// Matrix values live in an `.npy` next to the side-car; the record keeps
/// the file name and the unit.
#[derive(Debug, Serialize, Deserialize)]
struct MatrixRecord {
    file: String,
    unit: Unit,
}

const TYPE_SCALAR: &str = "scalar";
const TYPE_VECTOR: &str = "vector";
const TYPE_INTENSITY: &str = "intensity";
const TYPE_MATRIX: &str = "matrix";
const TYPE_UNAVAILABLE: &str = "unavailable";

impl MeasurementRecord {
    fn from_property(
        prop: &RegionProperty,
        photo: &str,
        layer_dir: &Path,
    ) -> Result<Self, StorageError> {
        let (prop_type, value) = match &prop.value {
            PropertyValue::Scalar(value) => (
                TYPE_SCALAR,
                serde_json::to_value(ScalarRecord {
                    raw: value.raw,
                    unit: value.unit,
                })?,
            ),
            PropertyValue::Vector(values, unit) => (
                TYPE_VECTOR,
                serde_json::to_value(VectorRecord {
                    values: values.clone(),
                    unit: *unit,
                })?,
            ),
            PropertyValue::Intensity(values) => {
                (TYPE_INTENSITY, serde_json::to_value(values)?)
            }
            PropertyValue::Matrix { data, unit } => {
                let file = format!("{photo}_{}_{}.npy", prop.info.key, prop.label);
                ndarray_npy::write_npy(layer_dir.join(&file), data)?;
                (
                    TYPE_MATRIX,
                    serde_json::to_value(MatrixRecord { file, unit: *unit })?,
                )
            }
            PropertyValue::Unavailable(reason) => {
                (TYPE_UNAVAILABLE, serde_json::to_value(reason)?)
            }
        };
        Ok(Self {
            name: prop.info.name.clone(),
            label: prop.label,
            value,
            prop_type: prop_type.to_string(),
            num_vals: prop.num_vals(),
            val_names: prop.val_names.clone(),
            col_names: prop.col_names.clone(),
            row_names: prop.row_names.clone(),
            key: prop.info.key.clone(),
            description: prop.info.description.clone(),
        })
    }

    fn into_property(
        self,
        layer_dir: &Path,
        file_name: &str,
    ) -> Result<RegionProperty, StorageError> {
        let value = match self.prop_type.as_str() {
            TYPE_SCALAR => {
                let scalar: ScalarRecord = serde_json::from_value(self.value)?;
                PropertyValue::Scalar(crate::model::units::Value::new(scalar.raw, scalar.unit))
            }
            TYPE_VECTOR => {
                let vector: VectorRecord = serde_json::from_value(self.value)?;
                PropertyValue::Vector(vector.values, vector.unit)
            }
            TYPE_INTENSITY => PropertyValue::Intensity(serde_json::from_value(self.value)?),
            TYPE_MATRIX => {
                let matrix: MatrixRecord = serde_json::from_value(self.value)?;
                let data: Array2<f64> = ndarray_npy::read_npy(layer_dir.join(&matrix.file))?;
                PropertyValue::Matrix {
                    data,
                    unit: matrix.unit,
                }
            }
            TYPE_UNAVAILABLE => PropertyValue::Unavailable(serde_json::from_value(self.value)?),
            other => {
                return Err(StorageError::malformed_record(
                    file_name,
                    format!("unknown prop_type '{other}'"),
                ));
            }
        };
        let mut prop = RegionProperty::new(
            self.label,
            PropertyInfo::new(self.key, self.name, self.description),
            value,
        );
        prop.val_names = self.val_names;
        prop.col_names = self.col_names;
        prop.row_names = self.row_names;
        Ok(prop)
    }
}
