//! Mean width of an elongated region.

use crate::measure::computation::PropertyComputation;
use crate::measure::properties::scaled;
use crate::measure::regions::RegionsCache;
use crate::model::hierarchy::Label;
use crate::model::photo::Photo;
use crate::model::property::{PropertyInfo, PropertyValue, RegionProperty};
use crate::model::units::{Unit, Value};

/// Area divided by the region's major-axis length.
///
/// The major-axis length is derived from the larger eigenvalue of the 2x2
/// covariance matrix of the region's pixel coordinates, matching the
/// standard ellipse-fit definition (length = 4 * sqrt(lambda_max)).
pub struct MeanWidth {
    info: PropertyInfo,
}

impl MeanWidth {
    pub fn new() -> Self {
        Self {
            info: PropertyInfo::new(
                "mean_width",
                "Mean width",
                "Region area divided by its major-axis length",
            ),
        }
    }
}

impl Default for MeanWidth {
    fn default() -> Self {
        Self::new()
    }
}

/// Major-axis length of the ellipse with the same second moments as the
/// mask, or `None` when the coordinate variance degenerates to zero.
pub(crate) fn major_axis_length(mask: &ndarray::Array2<bool>) -> Option<f64> {
    let mut count = 0usize;
    let mut sum_r = 0.0f64;
    let mut sum_c = 0.0f64;
    for ((row, col), &set) in mask.indexed_iter() {
        if set {
            sum_r += row as f64;
            sum_c += col as f64;
            count += 1;
        }
    }
    if count == 0 {
        return None;
    }
    let n = count as f64;
    let mean_r = sum_r / n;
    let mean_c = sum_c / n;
    let mut crr = 0.0f64;
    let mut ccc = 0.0f64;
    let mut crc = 0.0f64;
    for ((row, col), &set) in mask.indexed_iter() {
        if set {
            let dr = row as f64 - mean_r;
            let dc = col as f64 - mean_c;
            crr += dr * dr;
            ccc += dc * dc;
            crc += dr * dc;
        }
    }
    crr /= n;
    ccc /= n;
    crc /= n;
    let trace = crr + ccc;
    let discriminant = ((crr - ccc).powi(2) + 4.0 * crc * crc).sqrt();
    let lambda_max = (trace + discriminant) / 2.0;
    if lambda_max <= 0.0 {
        return None;
    }
    Some(4.0 * lambda_max.sqrt())
}

impl PropertyComputation for MeanWidth {
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
            let area = region.mask.iter().filter(|&&set| set).count() as f64;
            let value = match major_axis_length(&region.mask) {
                Some(length) => {
                    PropertyValue::Scalar(scaled(Value::new(area / length, Unit::PX), photo))
                }
                None => PropertyValue::Unavailable(
                    "region too small for an axis fit".to_string(),
                ),
            };
            props.push(RegionProperty::new(label, self.info.clone(), value));
        }
        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::hierarchy::tests::test_hierarchy;
    use crate::model::label_image::LabelImage;
    use ndarray::Array2;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn photo_with_strip() -> Photo {
        let hierarchy = Arc::new(test_hierarchy());
        let mut raster = Array2::<u32>::zeros((8, 8));
        // 1x6 horizontal strip.
        for col in 1..7 {
            raster[(3, col)] = 0x10200;
        }
        // Single isolated pixel of another label.
        raster[(6, 6)] = 0x10100;
        let mut photo = Photo::new("IMG_0006", (8, 8));
        photo.insert_layer(LabelImage::from_raster("Labels", raster, hierarchy, None));
        photo
    }

    #[test]
    fn test_major_axis_of_strip() {
        let photo = photo_with_strip();
        let cache = RegionsCache::new(&BTreeSet::from([0x10200u32]), &photo, "Labels");
        let length = major_axis_length(&cache.region(0x10200).unwrap().mask).unwrap();
        // Variance of {0..5} is 35/12; length = 4 * sqrt(35/12).
        assert!((length - 4.0 * (35.0f64 / 12.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_mean_width_of_strip() {
        let photo = photo_with_strip();
        let labels = [0x10200u32];
        let mut cache = RegionsCache::new(&BTreeSet::from(labels), &photo, "Labels");
        let props = MeanWidth::new().compute(&photo, &labels, &mut cache);
        let PropertyValue::Scalar(value) = &props[0].value else {
            panic!("expected scalar");
        };
        let expected = 6.0 / (4.0 * (35.0f64 / 12.0).sqrt());
        assert!((value.raw - expected).abs() < 1e-9);
        assert_eq!(value.unit, Unit::PX);
    }

    #[test]
    fn test_single_pixel_has_no_width() {
        let photo = photo_with_strip();
        let labels = [0x10100u32];
        let mut cache = RegionsCache::new(&BTreeSet::from(labels), &photo, "Labels");
        let props = MeanWidth::new().compute(&photo, &labels, &mut cache);
        assert!(matches!(props[0].value, PropertyValue::Unavailable(_)));
    }
}
