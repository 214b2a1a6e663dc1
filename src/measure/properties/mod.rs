//! Built-in property computations.

mod basic;
mod intensity;
mod texture;
mod width;

pub use basic::{Area, Circularity, Perimeter};
pub use intensity::{MeanHsv, MeanIntensity};
pub use texture::GlcmAsm;
pub use width::MeanWidth;

use ndarray::{Array2, s};

use crate::measure::computation::PropertyComputation;
use crate::measure::regions::Region;
use crate::model::photo::Photo;
use crate::model::units::Value;

/// Layer holding specular-highlight markings, excluded from color and
/// intensity statistics.
pub const REFLECTIONS_LAYER: &str = "Reflections";

/// Every built-in computation, in registration order.
pub fn builtins() -> Vec<Box<dyn PropertyComputation>> {
    vec![
        Box::new(Area::new()),
        Box::new(Perimeter::new()),
        Box::new(Circularity::new()),
        Box::new(MeanIntensity::new()),
        Box::new(MeanHsv::new()),
        Box::new(MeanWidth::new()),
        Box::new(GlcmAsm::new()),
    ]
}

/// Convert a pixel-unit value to metric when the photo carries a scale.
pub(crate) fn scaled(value: Value, photo: &Photo) -> Value {
    match photo.px_per_mm {
        Some(px_per_mm) if px_per_mm > 0.0 => value.to_metric(px_per_mm),
        _ => value,
    }
}

/// The region mask with reflection-marked pixels removed, still cropped to
/// the region bbox. Falls back to the plain mask when the photo has no
/// reflections layer.
pub(crate) fn mask_without_reflections(photo: &Photo, region: &Region) -> Array2<bool> {
    let Some(reflections) = photo.layer(REFLECTIONS_LAYER) else {
        return region.mask.clone();
    };
    let bbox = region.bbox;
    let roi = reflections
        .raster()
        .slice(s![bbox.top..=bbox.bottom, bbox.left..=bbox.right]);
    let mut mask = region.mask.clone();
    ndarray::Zip::from(&mut mask)
        .and(&roi)
        .for_each(|m, &reflection| {
            if reflection != 0 {
                *m = false;
            }
        });
    mask
}
