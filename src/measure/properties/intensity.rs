//! Color statistics of a region, excluding reflection-marked pixels.

use ndarray::Array3;

use crate::measure::computation::PropertyComputation;
use crate::measure::properties::mask_without_reflections;
use crate::measure::regions::{RegionsCache, SharedData};
use crate::model::hierarchy::Label;
use crate::model::photo::Photo;
use crate::model::property::{PropertyInfo, PropertyValue, RegionProperty};

/// Mean R, G, B of the region's pixels.
pub struct MeanIntensity {
    info: PropertyInfo,
}

impl MeanIntensity {
    pub fn new() -> Self {
        Self {
            info: PropertyInfo::new("mean_intensity", "Mean intensity", "Mean intensity (R, G, B)"),
        }
    }
}

impl Default for MeanIntensity {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyComputation for MeanIntensity {
    fn info(&self) -> &PropertyInfo {
        &self.info
    }

    fn targets(&self) -> Vec<String> {
        vec!["R".to_string(), "G".to_string(), "B".to_string()]
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
            let mask = mask_without_reflections(photo, region);
            let mut sums = [0.0f64; 3];
            let mut count = 0usize;
            for ((row, col), &set) in mask.indexed_iter() {
                if !set {
                    continue;
                }
                for (channel, sum) in sums.iter_mut().enumerate() {
                    *sum += region.image[(row, col, channel)] as f64;
                }
                count += 1;
            }
            let value = if count == 0 {
                PropertyValue::Unavailable("region fully covered by reflections".to_string())
            } else {
                PropertyValue::Intensity(sums.iter().map(|s| s / count as f64).collect())
            };
            props.push(
                RegionProperty::new(label, self.info.clone(), value)
                    .with_val_names(&["R", "G", "B"]),
            );
        }
        props
    }
}

/// Mean H, S, V of the region's pixels. The hue mean is circular.
///
/// The HSV conversion of the whole photo is computed once per batch and
/// memoized in the cache's data storage.
pub struct MeanHsv {
    info: PropertyInfo,
}

/// Memo key for the shared HSV conversion.
const HSV_IMAGE_KEY: &str = "hsv_image";

impl MeanHsv {
    pub fn new() -> Self {
        Self {
            info: PropertyInfo::new("mean_hsv", "Mean HSV", "Mean HSV of a region"),
        }
    }
}

impl Default for MeanHsv {
    fn default() -> Self {
        Self::new()
    }
}

/// RGB bytes to (hue degrees, saturation, value), all standard definitions.
pub(crate) fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f64, f64, f64) {
    let r = r as f64 / 255.0;
    let g = g as f64 / 255.0;
    let b = b as f64 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let saturation = if max == 0.0 { 0.0 } else { delta / max };
    (hue, saturation, max)
}

pub(crate) fn hsv_image(photo: &Photo, cache: &mut RegionsCache) -> Option<Array3<f64>> {
    if let Some(SharedData::Image(hsv)) = cache.data_storage.get(HSV_IMAGE_KEY) {
        return Some(hsv.clone());
    }
    let image = photo.image.as_ref()?;
    let (rows, cols, _) = image.dim();
    let mut hsv = Array3::zeros((rows, cols, 3));
    for row in 0..rows {
        for col in 0..cols {
            let (h, s, v) = rgb_to_hsv(
                image[(row, col, 0)],
                image[(row, col, 1)],
                image[(row, col, 2)],
            );
            hsv[(row, col, 0)] = h;
            hsv[(row, col, 1)] = s;
            hsv[(row, col, 2)] = v;
        }
    }
    cache
        .data_storage
        .insert(HSV_IMAGE_KEY.to_string(), SharedData::Image(hsv.clone()));
    Some(hsv)
}

impl PropertyComputation for MeanHsv {
    fn info(&self) -> &PropertyInfo {
        &self.info
    }

    fn targets(&self) -> Vec<String> {
        vec!["H".to_string(), "S".to_string(), "V".to_string()]
    }

    fn compute(
        &self,
        photo: &Photo,
        labels: &[Label],
        cache: &mut RegionsCache,
    ) -> Vec<RegionProperty> {
        let Some(hsv) = hsv_image(photo, cache) else {
            return Vec::new();
        };
        let mut props = Vec::new();
        for &label in labels {
            let Some(region) = cache.region(label) else {
                continue;
            };
            let mask = mask_without_reflections(photo, region);
            let mut sin_sum = 0.0f64;
            let mut cos_sum = 0.0f64;
            let mut sat_sum = 0.0f64;
            let mut val_sum = 0.0f64;
            let mut count = 0usize;
            for ((row, col), &set) in mask.indexed_iter() {
                if !set {
                    continue;
                }
                let full = (region.bbox.top + row, region.bbox.left + col);
                let hue = hsv[(full.0, full.1, 0)].to_radians();
                sin_sum += hue.sin();
                cos_sum += hue.cos();
                sat_sum += hsv[(full.0, full.1, 1)];
                val_sum += hsv[(full.0, full.1, 2)];
                count += 1;
            }
            let value = if count == 0 {
                PropertyValue::Unavailable("region fully covered by reflections".to_string())
            } else {
                let n = count as f64;
                let mean_hue = (sin_sum / n)
                    .atan2(cos_sum / n)
                    .to_degrees()
                    .rem_euclid(360.0);
                PropertyValue::Intensity(vec![mean_hue, sat_sum / n, val_sum / n])
            };
            props.push(
                RegionProperty::new(label, self.info.clone(), value)
                    .with_val_names(&["H", "S", "V"]),
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
    use ndarray::Array2;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn red_photo() -> Photo {
        let hierarchy = Arc::new(test_hierarchy());
        let mut raster = Array2::<u32>::zeros((4, 4));
        raster[(1, 1)] = 0x10100;
        raster[(1, 2)] = 0x10100;
        let mut photo = Photo::new("IMG_0005", (4, 4));
        photo.insert_layer(LabelImage::from_raster("Labels", raster, hierarchy, None));
        let mut image = Array3::<u8>::zeros((4, 4, 3));
        image.slice_mut(ndarray::s![.., .., 0]).fill(200);
        photo.image = Some(image);
        photo
    }

    #[test]
    fn test_rgb_to_hsv_primaries() {
        assert_eq!(rgb_to_hsv(255, 0, 0).0, 0.0);
        assert_eq!(rgb_to_hsv(0, 255, 0).0, 120.0);
        assert_eq!(rgb_to_hsv(0, 0, 255).0, 240.0);
        let (_, s, v) = rgb_to_hsv(255, 255, 255);
        assert_eq!((s, v), (0.0, 1.0));
    }

    #[test]
    fn test_mean_intensity_of_uniform_region() {
        let photo = red_photo();
        let labels = [0x10100u32];
        let mut cache = RegionsCache::new(&BTreeSet::from(labels), &photo, "Labels");
        let props = MeanIntensity::new().compute(&photo, &labels, &mut cache);
        let PropertyValue::Intensity(rgb) = &props[0].value else {
            panic!("expected intensity");
        };
        assert_eq!(rgb, &vec![200.0, 0.0, 0.0]);
    }

    #[test]
    fn test_mean_hsv_uses_memoized_conversion() {
        let photo = red_photo();
        let labels = [0x10100u32];
        let mut cache = RegionsCache::new(&BTreeSet::from(labels), &photo, "Labels");
        let props = MeanHsv::new().compute(&photo, &labels, &mut cache);
        assert!(cache.data_storage.contains_key(HSV_IMAGE_KEY));
        let PropertyValue::Intensity(hsv) = &props[0].value else {
            panic!("expected intensity");
        };
        assert!((hsv[0] - 0.0).abs() < 1e-6 || (hsv[0] - 360.0).abs() < 1e-6);
        assert!((hsv[1] - 1.0).abs() < 1e-9);

        // Second run hits the memo and agrees exactly.
        let props2 = MeanHsv::new().compute(&photo, &labels, &mut cache);
        assert_eq!(props[0].value, props2[0].value);
    }

    #[test]
    fn test_reflections_excluded() {
        let mut photo = red_photo();
        let hierarchy = photo.layer("Labels").unwrap().hierarchy().clone();
        let mut reflections = Array2::<u32>::zeros((4, 4));
        reflections[(1, 1)] = 0x20000;
        photo.insert_layer(LabelImage::from_raster(
            "Reflections",
            reflections,
            hierarchy,
            Some("Labels".to_string()),
        ));
        // Brighten the reflection pixel; it must not affect the mean.
        photo.image.as_mut().unwrap()[(1, 1, 1)] = 255;

        let labels = [0x10100u32];
        let mut cache = RegionsCache::new(&BTreeSet::from(labels), &photo, "Labels");
        let props = MeanIntensity::new().compute(&photo, &labels, &mut cache);
        let PropertyValue::Intensity(rgb) = &props[0].value else {
            panic!("expected intensity");
        };
        assert_eq!(rgb, &vec![200.0, 0.0, 0.0]);
    }
}
