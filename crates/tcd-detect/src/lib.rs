// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

pub mod aggregate;
pub mod density;
pub mod detector;
pub mod isolation;
pub mod params;
pub mod robust;
pub mod scale;

pub use aggregate::{Aggregation, aggregate};
pub use density::{DensityConfig, DensityDetector, DistanceMetric};
pub use detector::{Detector, DetectorConfig, DetectorFactory, DetectorKind, OutlierDetector};
pub use isolation::{
    Contamination, IsolationForestConfig, IsolationForestDetector, MaxFeatures, MaxSamples,
};
pub use params::{ParamValue, ParameterCombination};
pub use robust::{McdEstimate, RobustDistanceConfig, RobustDistanceDetector};
pub use scale::StandardScaler;

/// Per-date outlier detectors and aggregation for tcd-rs.
pub fn crate_name() -> &'static str {
    "tcd-detect"
}
