//! Texture statistics built on gray-level co-occurrence matrices.

use std::collections::HashMap;
use std::f64::consts::PI;

use ndarray::Array2;

use crate::measure::computation::PropertyComputation;
use crate::measure::properties::mask_without_reflections;
use crate::measure::regions::RegionsCache;
use crate::model::hierarchy::Label;
use crate::model::photo::Photo;
use crate::model::property::{PropertyInfo, PropertyValue, RegionProperty};
use crate::model::units::Unit;

/// Co-occurrence distances in millimetres; converted to pixels when the
/// photo carries a scale, otherwise 1, 2 and 3 pixels are used directly.
const DISTANCES_MM: [f64; 3] = [0.02, 0.04, 0.06];

/// Sampling directions, in radians.
const ANGLES: [f64; 4] = [0.0, PI / 2.0, PI, 3.0 * PI / 2.0];

/// Angular second moment of the region's gray-level co-occurrence matrix,
/// per HSV channel, distance and direction.
///
/// Each record carries a matrix with one row per channel/distance pair and
/// one column per direction. Pixel pairs are counted only when both ends
/// lie inside the region and outside the reflections layer.
pub struct GlcmAsm {
    info: PropertyInfo,
}

impl GlcmAsm {
    pub fn new() -> Self {
        Self {
            info: PropertyInfo::new("glcm_asm", "GLCM ASM", "GLCM angular second moment"),
        }
    }
}

impl Default for GlcmAsm {
    fn default() -> Self {
        Self::new()
    }
}

/// Offset of a co-occurring pixel, skimage's convention.
fn offset(distance: usize, angle: f64) -> (isize, isize) {
    let d = distance as f64;
    (
        (d * angle.sin()).round() as isize,
        (d * angle.cos()).round() as isize,
    )
}

/// Quantize one HSV channel to 255 levels. The top level is reserved so a
/// quantized value never collides with the out-of-region sentinel.
fn quantize(value: f64, channel: usize) -> u8 {
    let scaled = if channel == 0 {
        value / 360.0 * 255.0
    } else {
        value * 255.0
    };
    scaled.round().min(254.0) as u8
}

/// ASM of the pair counts at one (distance, direction): the sum of squared
/// normalized co-occurrence frequencies. Zero when no pair exists.
fn asm(counts: &HashMap<(u8, u8), u64>) -> f64 {
    let total: u64 = counts.values().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    counts
        .values()
        .map(|&c| (c as f64 / total).powi(2))
        .sum()
}

impl PropertyComputation for GlcmAsm {
    fn info(&self) -> &PropertyInfo {
        &self.info
    }

    fn group(&self) -> &str {
        "GLCM properties"
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
        let Some(hsv) = super::intensity::hsv_image(photo, cache) else {
            return Vec::new();
        };
        let (distances, row_unit): (Vec<usize>, _) = match photo.px_per_mm {
            Some(px_per_mm) if px_per_mm > 0.0 => (
                DISTANCES_MM
                    .iter()
                    .map(|mm| (mm * px_per_mm).round() as usize)
                    .collect(),
                "mm",
            ),
            _ => (vec![1, 2, 3], "px"),
        };
        let row_names: Vec<String> = ["H", "S", "V"]
            .iter()
            .flat_map(|channel| {
                distances.iter().zip(DISTANCES_MM).map(move |(px, mm)| {
                    if row_unit == "mm" {
                        format!("{channel} distance {mm} mm")
                    } else {
                        format!("{channel} distance {px} px")
                    }
                })
            })
            .collect();
        let col_names: Vec<String> = ["0°", "90°", "180°", "270°"]
            .iter()
            .map(|a| format!("angle {a}"))
            .collect();

        let mut props = Vec::new();
        for &label in labels {
            let Some(region) = cache.region(label) else {
                continue;
            };
            let mask = mask_without_reflections(photo, region);
            if !mask.iter().any(|&set| set) {
                let mut prop = RegionProperty::new(
                    label,
                    self.info.clone(),
                    PropertyValue::Unavailable("region fully covered by reflections".to_string()),
                );
                prop.val_names = self.targets();
                props.push(prop);
                continue;
            }
            let (rows, cols) = mask.dim();
            let mut data = Array2::<f64>::zeros((3 * distances.len(), ANGLES.len()));
            for channel in 0..3 {
                // Quantized channel values over the region bbox; `None`
                // marks pixels outside the usable mask.
                let levels = Array2::from_shape_fn((rows, cols), |(row, col)| {
                    if mask[(row, col)] {
                        let full = (region.bbox.top + row, region.bbox.left + col);
                        Some(quantize(hsv[(full.0, full.1, channel)], channel))
                    } else {
                        None
                    }
                });
                for (d_idx, &distance) in distances.iter().enumerate() {
                    for (a_idx, &angle) in ANGLES.iter().enumerate() {
                        let (dr, dc) = offset(distance, angle);
                        let mut counts: HashMap<(u8, u8), u64> = HashMap::new();
                        for ((row, col), &level) in levels.indexed_iter() {
                            let Some(from) = level else { continue };
                            let (nr, nc) = (row as isize + dr, col as isize + dc);
                            if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                                continue;
                            }
                            let Some(to) = levels[(nr as usize, nc as usize)] else {
                                continue;
                            };
                            *counts.entry((from, to)).or_insert(0) += 1;
                        }
                        data[(channel * distances.len() + d_idx, a_idx)] = asm(&counts);
                    }
                }
            }
            let mut prop = RegionProperty::new(
                label,
                self.info.clone(),
                PropertyValue::Matrix {
                    data,
                    unit: Unit::NONE,
                },
            );
            prop.val_names = self.targets();
            prop.row_names = row_names.clone();
            prop.col_names = col_names.clone();
            props.push(prop);
        }
        props
    }
}
