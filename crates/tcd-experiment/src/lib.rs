// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

pub mod config;
pub mod grid;
pub mod runner;

pub use config::{
    CURRENT_SCHEMA_VERSION, ExperimentConfig, ExperimentConfigWire,
    MAX_FORWARD_COMPAT_SCHEMA_VERSION, ParameterSpace, UnknownFields, validate_schema_version,
};
pub use grid::ParameterGrid;
pub use runner::{
    CombinationFailure, EvaluationResult, ExperimentInputs, ExperimentReport, RunOptions,
    SampleOutlier, format_elapsed, run, run_experiment,
};

/// Grid-search experiment runner for tcd-rs.
pub fn crate_name() -> &'static str {
    "tcd-experiment"
}
