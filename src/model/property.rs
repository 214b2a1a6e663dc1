//! Immutable measurement records attached to label images.

use ndarray::Array2;

use crate::model::units::{Unit, Value};

/// Identity of a property computation: stable key plus display metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    /// Stable key, e.g. `"area"`. Used as the property-table key.
    pub key: String,
    pub name: String,
    pub description: String,
}

impl PropertyInfo {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Typed value of a region property.
///
/// `Unavailable` is the explicit replacement for magic numeric sentinels:
/// degenerate geometry yields a reason string instead of aborting the batch
/// or encoding failure as a number.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Single measured scalar with its unit.
    Scalar(Value),
    /// Vector of floats sharing one unit.
    Vector(Vec<f64>, Unit),
    /// Categorical color/intensity tuple (e.g. R, G, B or H, S, V).
    Intensity(Vec<f64>),
    /// 2D matrix with named rows/columns; serialized to a side-car array.
    Matrix { data: Array2<f64>, unit: Unit },
    /// Computation could not produce a meaningful value for this region.
    Unavailable(String),
}

impl PropertyValue {
    /// Number of scalar components carried by this value.
    pub fn num_vals(&self) -> usize {
        match self {
            PropertyValue::Scalar(_) => 1,
            PropertyValue::Vector(values, _) | PropertyValue::Intensity(values) => values.len(),
            PropertyValue::Matrix { data, .. } => data.len(),
            PropertyValue::Unavailable(_) => 0,
        }
    }

    /// The unit tag, if this value is a measured quantity.
    pub fn unit(&self) -> Option<Unit> {
        match self {
            PropertyValue::Scalar(value) => Some(value.unit),
            PropertyValue::Vector(_, unit) | PropertyValue::Matrix { unit, .. } => Some(*unit),
            PropertyValue::Intensity(_) | PropertyValue::Unavailable(_) => None,
        }
    }
}

/// One measurement of one region. Immutable once produced; recomputation
/// replaces the record under its key, never mutates it in place.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionProperty {
    /// Region label this measurement applies to.
    pub label: u32,
    pub info: PropertyInfo,
    pub value: PropertyValue,
    /// Names of the individual scalar components.
    pub val_names: Vec<String>,
    /// Row names when the value is a matrix.
    pub row_names: Vec<String>,
    /// Column names when the value is a matrix.
    pub col_names: Vec<String>,
}

impl RegionProperty {
    pub fn new(label: u32, info: PropertyInfo, value: PropertyValue) -> Self {
        Self {
            label,
            info,
            value,
            val_names: Vec::new(),
            row_names: Vec::new(),
            col_names: Vec::new(),
        }
    }

    pub fn with_val_names(mut self, names: &[&str]) -> Self {
        self.val_names = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn num_vals(&self) -> usize {
        self.value.num_vals()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_num_vals_per_value_kind() {
        assert_eq!(PropertyValue::Scalar(Value::dimensionless(1.0)).num_vals(), 1);
        assert_eq!(
            PropertyValue::Intensity(vec![1.0, 2.0, 3.0]).num_vals(),
            3
        );
        let matrix = PropertyValue::Matrix {
            data: arr2(&[[1.0, 2.0], [3.0, 4.0]]),
            unit: Unit::NONE,
        };
        assert_eq!(matrix.num_vals(), 4);
        assert_eq!(PropertyValue::Unavailable("degenerate".into()).num_vals(), 0);
    }

    #[test]
    fn test_unit_tag() {
        let area = PropertyValue::Scalar(Value::new(4.0, Unit::MM2));
        assert_eq!(area.unit(), Some(Unit::MM2));
        assert_eq!(PropertyValue::Intensity(vec![0.0]).unit(), None);
    }
}
