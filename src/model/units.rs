//! Physical units for measured region properties.
//!
//! Measurements are produced in pixel units and converted to metric when the
//! photo carries a scale (pixels per millimetre). Only single-base units are
//! modelled; the scale itself is kept as a plain `f64` on the photo.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Base quantity a unit measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaseUnit {
    /// Dimensionless quantity (ratios, counts).
    None,
    /// Image pixels.
    Pixel,
    /// Metres (combined with an SI prefix exponent).
    Metre,
}

/// A unit tag: base quantity, SI prefix (power of ten) and exponent.
///
/// `power` is the dimensional exponent, e.g. 2 for an area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub base: BaseUnit,
    /// Power-of-ten prefix exponent (-3 for milli, 0 for none).
    pub prefix: i8,
    /// Dimensional exponent (1 = length, 2 = area).
    pub power: i8,
}

impl Unit {
    /// Dimensionless.
    pub const NONE: Unit = Unit {
        base: BaseUnit::None,
        prefix: 0,
        power: 0,
    };
    /// Pixels.
    pub const PX: Unit = Unit {
        base: BaseUnit::Pixel,
        prefix: 0,
        power: 1,
    };
    /// Square pixels.
    pub const PX2: Unit = Unit {
        base: BaseUnit::Pixel,
        prefix: 0,
        power: 2,
    };
    /// Millimetres.
    pub const MM: Unit = Unit {
        base: BaseUnit::Metre,
        prefix: -3,
        power: 1,
    };
    /// Square millimetres.
    pub const MM2: Unit = Unit {
        base: BaseUnit::Metre,
        prefix: -3,
        power: 2,
    };

    /// Whether this unit represents a measured physical quantity.
    pub fn is_physical(&self) -> bool {
        !matches!(self.base, BaseUnit::None)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match (self.base, self.prefix) {
            (BaseUnit::None, _) => return Ok(()),
            (BaseUnit::Pixel, _) => "px",
            (BaseUnit::Metre, -3) => "mm",
            (BaseUnit::Metre, -6) => "um",
            (BaseUnit::Metre, 0) => "m",
            (BaseUnit::Metre, p) => return write!(f, "10^{}m^{}", p, self.power),
        };
        match self.power {
            1 => write!(f, "{symbol}"),
            p => write!(f, "{symbol}^{p}"),
        }
    }
}

/// A scalar measurement with its unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Value {
    pub raw: f64,
    pub unit: Unit,
}

impl Value {
    pub fn new(raw: f64, unit: Unit) -> Self {
        Self { raw, unit }
    }

    /// Dimensionless value.
    pub fn dimensionless(raw: f64) -> Self {
        Self::new(raw, Unit::NONE)
    }

    /// Convert a pixel-unit value to millimetres using `px_per_mm`.
    ///
    /// Applies the scale once per dimensional power (a px^2 area is divided by
    /// the squared scale). Values that are not pixel-based are returned
    /// unchanged.
    pub fn to_metric(self, px_per_mm: f64) -> Value {
        if self.unit.base != BaseUnit::Pixel || px_per_mm <= 0.0 {
            return self;
        }
        let factor = px_per_mm.powi(self.unit.power as i32);
        Value::new(
            self.raw / factor,
            Unit {
                base: BaseUnit::Metre,
                prefix: -3,
                power: self.unit.power,
            },
        )
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unit.is_physical() {
            write!(f, "{:.2} {}", self.raw, self.unit)
        } else {
            write!(f, "{:.2}", self.raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_display() {
        assert_eq!(Unit::PX.to_string(), "px");
        assert_eq!(Unit::PX2.to_string(), "px^2");
        assert_eq!(Unit::MM2.to_string(), "mm^2");
        assert_eq!(Unit::NONE.to_string(), "");
    }

    #[test]
    fn test_to_metric_scales_by_power() {
        let area = Value::new(200.0, Unit::PX2);
        let converted = area.to_metric(10.0);
        assert_eq!(converted.unit, Unit::MM2);
        assert!((converted.raw - 2.0).abs() < 1e-9);

        let length = Value::new(50.0, Unit::PX);
        let converted = length.to_metric(10.0);
        assert_eq!(converted.unit, Unit::MM);
        assert!((converted.raw - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_to_metric_ignores_dimensionless() {
        let v = Value::dimensionless(0.5);
        assert_eq!(v.to_metric(10.0), v);
    }
}
