//! Area, perimeter and circularity of a region.

use std::f64::consts::PI;

use ndarray::Array2;

use crate::measure::computation::PropertyComputation;
use crate::measure::properties::scaled;
use crate::measure::regions::RegionsCache;
use crate::model::hierarchy::Label;
use crate::model::photo::Photo;
use crate::model::property::{PropertyInfo, PropertyValue, RegionProperty};
use crate::model::units::{Unit, Value};

/// Pixel count of the region, in px^2 or mm^2.
pub struct Area {
    info: PropertyInfo,
}

impl Area {
    pub fn new() -> Self {
        Self {
            info: PropertyInfo::new("area", "Area", "Area of the region (px^2 or mm^2)"),
        }
    }
}

impl Default for Area {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyComputation for Area {
    fn info(&self) -> &PropertyInfo {
        &self.info
    }

    fn compute(
        &self,
        photo: &Photo,
        labels: &[Label],
        cache: &mut RegionsCache,
    ) -> Vec<RegionProperty> {
        let mut props = Vec::new();
        for &label in labels {
            let Some(region) = cache.region(label) else {
                continue;
            };
            let pixels = region.mask.iter().filter(|&&m| m).count();
            let value = scaled(Value::new(pixels as f64, Unit::PX2), photo);
            props.push(
                RegionProperty::new(label, self.info.clone(), PropertyValue::Scalar(value))
                    .with_val_names(&["Area"]),
            );
        }
        props
    }
}

/// Length of the region boundary, counted as unit edges between region and
/// non-region pixels (4-connectivity).
pub struct Perimeter {
    info: PropertyInfo,
}

impl Perimeter {
    pub fn new() -> Self {
        Self {
            info: PropertyInfo::new("perimeter", "Perimeter", "Boundary length (px or mm)"),
        }
    }
}

impl Default for Perimeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Count of mask/background unit edges, including the mask border.
pub(crate) fn boundary_edges(mask: &Array2<bool>) -> usize {
    let (rows, cols) = mask.dim();
    let mut edges = 0;
    for ((row, col), &set) in mask.indexed_iter() {
        if !set {
            continue;
        }
        let neighbors = [
            (row.wrapping_sub(1), col),
            (row + 1, col),
            (row, col.wrapping_sub(1)),
            (row, col + 1),
        ];
        for (nr, nc) in neighbors {
            if nr >= rows || nc >= cols || !mask[(nr, nc)] {
                edges += 1;
            }
        }
    }
    edges
}

impl PropertyComputation for Perimeter {
    fn info(&self) -> &PropertyInfo {
        &self.info
    }

    fn compute(
        &self,
        photo: &Photo,
        labels: &[Label],
        cache: &mut RegionsCache,
    ) -> Vec<RegionProperty> {
        let mut props = Vec::new();
        for &label in labels {
            let Some(region) = cache.region(label) else {
                continue;
            };
            let edges = boundary_edges(&region.mask);
            let value = scaled(Value::new(edges as f64, Unit::PX), photo);
            props.push(
                RegionProperty::new(label, self.info.clone(), PropertyValue::Scalar(value))
                    .with_val_names(&["Perimeter"]),
            );
        }
        props
    }
}

/// `4*pi*area / perimeter^2`, clamped to [0, 1]. 1.0 is a perfect circle.
pub struct Circularity {
    info: PropertyInfo,
}

impl Circularity {
    pub fn new() -> Self {
        Self {
            info: PropertyInfo::new(
                "circularity",
                "Circularity",
                "Circularity (0.0 to 1.0, where 1.0 = perfect circle)",
            ),
        }
    }
}

impl Default for Circularity {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyComputation for Circularity {
    fn info(&self) -> &PropertyInfo {
        &self.info
    }

    fn compute(
        &self,
        _photo: &Photo,
        labels: &[Label],
        cache: &mut RegionsCache,
    ) -> Vec<RegionProperty> {
        let mut props = Vec::new();
        for &label in labels {
            let Some(region) = cache.region(label) else {
                continue;
            };
            let area = region.mask.iter().filter(|&&m| m).count() as f64;
            let perimeter = boundary_edges(&region.mask) as f64;
            let value = if perimeter == 0.0 {
                PropertyValue::Unavailable("degenerate boundary".to_string())
            } else {
                let circularity = (4.0 * PI * area / (perimeter * perimeter)).clamp(0.0, 1.0);
                PropertyValue::Scalar(Value::dimensionless(circularity))
            };
            props.push(
                RegionProperty::new(label, self.info.clone(), value)
                    .with_val_names(&["Circularity"]),
            );
        }
        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::hierarchy::tests::test_hierarchy;
    use crate::model::label_image::LabelImage;
    use ndarray::arr2;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn photo_with_square() -> Photo {
        let hierarchy = Arc::new(test_hierarchy());
        let mut raster = ndarray::Array2::<u32>::zeros((6, 6));
        for row in 1..4 {
            for col in 1..4 {
                raster[(row, col)] = 0x10100;
            }
        }
        let mut photo = Photo::new("IMG_0004", (6, 6));
        photo.insert_layer(LabelImage::from_raster("Labels", raster, hierarchy, None));
        photo
    }

    #[test]
    fn test_area_in_pixels_and_metric() {
        let mut photo = photo_with_square();
        let labels = [0x10100u32];
        let mut cache = RegionsCache::new(&BTreeSet::from(labels), &photo, "Labels");

        let props = Area::new().compute(&photo, &labels, &mut cache);
        assert_eq!(props.len(), 1);
        let PropertyValue::Scalar(value) = &props[0].value else {
            panic!("expected scalar");
        };
        assert_eq!(value.raw, 9.0);
        assert_eq!(value.unit, Unit::PX2);

        photo.px_per_mm = Some(3.0);
        let props = Area::new().compute(&photo, &labels, &mut cache);
        let PropertyValue::Scalar(value) = &props[0].value else {
            panic!("expected scalar");
        };
        assert!((value.raw - 1.0).abs() < 1e-9);
        assert_eq!(value.unit, Unit::MM2);
    }

    #[test]
    fn test_perimeter_of_square() {
        let photo = photo_with_square();
        let labels = [0x10100u32];
        let mut cache = RegionsCache::new(&BTreeSet::from(labels), &photo, "Labels");
        let props = Perimeter::new().compute(&photo, &labels, &mut cache);
        let PropertyValue::Scalar(value) = &props[0].value else {
            panic!("expected scalar");
        };
        // 3x3 square: 12 boundary edges.
        assert_eq!(value.raw, 12.0);
    }

    #[test]
    fn test_boundary_edges_single_pixel() {
        let mask = arr2(&[[true]]);
        assert_eq!(boundary_edges(&mask), 4);
    }

    #[test]
    fn test_circularity_bounds() {
        let photo = photo_with_square();
        let labels = [0x10100u32];
        let mut cache = RegionsCache::new(&BTreeSet::from(labels), &photo, "Labels");
        let props = Circularity::new().compute(&photo, &labels, &mut cache);
        let PropertyValue::Scalar(value) = &props[0].value else {
            panic!("expected scalar");
        };
        assert!(value.raw > 0.0 && value.raw <= 1.0);
    }

    #[test]
    fn test_absent_label_skipped() {
        let photo = photo_with_square();
        let labels = [0x20000u32];
        let mut cache = RegionsCache::new(&BTreeSet::from(labels), &photo, "Labels");
        assert!(Area::new().compute(&photo, &labels, &mut cache).is_empty());
    }
}
