//! The property-computation contract and the explicit registry of
//! implementations.
//!
//! Computations are pure functions of `(photo, labels, cache)`: they read
//! the photo and the shared regions cache (populating its memo table is
//! allowed) and return measurement records, never touching rasters or the
//! cache's regions. Discovery is a compile-time registry, not reflection;
//! each computation exposes its parameters and output schema as data.

use crate::measure::regions::RegionsCache;
use crate::model::hierarchy::Label;
use crate::model::photo::Photo;
use crate::model::property::{PropertyInfo, RegionProperty};

/// Typed user-tunable parameter of a computation.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Bool(bool),
    Str(String),
}

/// Declaration of one parameter: key, display name, default and bounds.
#[derive(Debug, Clone)]
pub struct UserParam {
    pub key: String,
    pub name: String,
    pub default: ParamValue,
    /// Inclusive bounds, for integer parameters.
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub step: Option<i64>,
}

impl UserParam {
    pub fn int(key: &str, name: &str, default: i64, min: i64, max: i64) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            default: ParamValue::Int(default),
            min: Some(min),
            max: Some(max),
            step: Some(1),
        }
    }

    pub fn bool(key: &str, name: &str, default: bool) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            default: ParamValue::Bool(default),
            min: None,
            max: None,
            step: None,
        }
    }
}

/// A pluggable region measurement.
pub trait PropertyComputation: Send + Sync {
    /// Identity and display metadata; `info().key` keys the property table.
    fn info(&self) -> &PropertyInfo;

    /// Grouping name for presentation.
    fn group(&self) -> &str {
        "Basic properties"
    }

    /// Declared tunable parameters.
    fn user_params(&self) -> Vec<UserParam> {
        Vec::new()
    }

    /// Whether the computation only makes sense on leaf regions.
    fn region_restricted(&self) -> bool {
        false
    }

    /// Names of the scalar components each record carries, in order. Empty
    /// for single-scalar computations.
    fn targets(&self) -> Vec<String> {
        Vec::new()
    }

    /// Compute records for the requested labels. Labels without a cache
    /// entry are skipped silently; degenerate regions yield records with an
    /// `Unavailable` value rather than aborting.
    fn compute(
        &self,
        photo: &Photo,
        labels: &[Label],
        cache: &mut RegionsCache,
    ) -> Vec<RegionProperty>;
}

/// Explicit registry of available computations.
pub struct ComputationRegistry {
    computations: Vec<Box<dyn PropertyComputation>>,
}

impl ComputationRegistry {
    pub fn empty() -> Self {
        Self {
            computations: Vec::new(),
        }
    }

    /// Registry with every built-in computation.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for computation in crate::measure::properties::builtins() {
            registry.register(computation);
        }
        registry
    }

    pub fn register(&mut self, computation: Box<dyn PropertyComputation>) {
        log::debug!("Registered computation '{}'", computation.info().key);
        self.computations.push(computation);
    }

    pub fn get(&self, key: &str) -> Option<&dyn PropertyComputation> {
        self.computations
            .iter()
            .find(|c| c.info().key == key)
            .map(Box::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn PropertyComputation> {
        self.computations.iter().map(Box::as_ref)
    }

    pub fn len(&self) -> usize {
        self.computations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.computations.is_empty()
    }
}
