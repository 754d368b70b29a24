// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

pub mod control;
pub mod diagnostics;
pub mod error;
pub mod execution_context;
pub mod flags;
pub mod ground_truth;
pub mod observability;
pub mod repro;
pub mod table;

pub use control::CancelToken;
pub use diagnostics::{
    AggregationDiagnostics, DIAGNOSTICS_SCHEMA_VERSION, RunDiagnostics, SkippedDate,
};
pub use error::TcdError;
pub use execution_context::ExecutionContext;
pub use flags::{IntervalTable, OutlierFlag, WindowedFlag};
pub use ground_truth::GroundTruth;
pub use observability::ProgressSink;
pub use repro::ReproMode;
pub use table::{DEFAULT_FEATURE_KEYS, DateSample, FeatureTable, FieldId, SampleMatrix};

/// Formatting used for every calendar date that leaves the core as text.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Core shared types and traits for tcd-rs.
pub fn crate_name() -> &'static str {
    "tcd-core"
}
