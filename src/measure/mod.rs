//! Region measurement: cached region extraction, pluggable property
//! computations and batch scheduling.

pub mod computation;
pub mod properties;
pub mod regions;
pub mod scheduler;

pub use computation::{ComputationRegistry, ParamValue, PropertyComputation, UserParam};
pub use regions::{Region, RegionsCache, SharedData};
pub use scheduler::{BatchMessage, BatchRunner, CancelToken, ComputationsScheduler, Job};
