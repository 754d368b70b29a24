// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::grid::ParameterGrid;
use crate::runner::RunOptions;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tcd_core::{DEFAULT_FEATURE_KEYS, ReproMode, TcdError};
use tcd_detect::{DetectorKind, ParameterCombination};

/// Current schema version written for experiment configs.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;
/// Maximum additive forward-compatible schema version accepted by readers.
pub const MAX_FORWARD_COMPAT_SCHEMA_VERSION: u32 = 2;

pub type UnknownFields = Map<String, Value>;

/// Validates whether a config schema version is currently readable.
pub fn validate_schema_version(schema_version: u32, artifact: &str) -> Result<(), TcdError> {
    if (CURRENT_SCHEMA_VERSION..=MAX_FORWARD_COMPAT_SCHEMA_VERSION).contains(&schema_version) {
        return Ok(());
    }

    Err(TcdError::configuration(format!(
        "{artifact} schema_version={schema_version} is unsupported; supported versions are {CURRENT_SCHEMA_VERSION}..={MAX_FORWARD_COMPAT_SCHEMA_VERSION}"
    )))
}

/// Where the runner's parameter combinations come from.
#[derive(Clone, Debug, PartialEq)]
pub enum ParameterSpace {
    Grid(ParameterGrid),
    List(Vec<ParameterCombination>),
}

impl Default for ParameterSpace {
    fn default() -> Self {
        Self::Grid(ParameterGrid::new())
    }
}

impl ParameterSpace {
    pub fn combinations(&self) -> Result<Vec<ParameterCombination>, TcdError> {
        match self {
            Self::Grid(grid) => grid.combinations(),
            Self::List(list) => Ok(list.clone()),
        }
    }
}

/// One grid-search experiment: detector, features and search space.
#[derive(Clone, Debug, PartialEq)]
pub struct ExperimentConfig {
    pub detector: DetectorKind,
    pub feature_keys: Vec<String>,
    pub parameters: ParameterSpace,
    pub sample_limit: usize,
    pub repro_mode: ReproMode,
}

impl ExperimentConfig {
    pub fn new(detector: DetectorKind) -> Self {
        Self {
            detector,
            feature_keys: default_feature_keys(),
            parameters: ParameterSpace::default(),
            sample_limit: default_sample_limit(),
            repro_mode: ReproMode::default(),
        }
    }

    pub fn with_grid(mut self, grid: ParameterGrid) -> Self {
        self.parameters = ParameterSpace::Grid(grid);
        self
    }

    pub fn with_combinations(mut self, combinations: Vec<ParameterCombination>) -> Self {
        self.parameters = ParameterSpace::List(combinations);
        self
    }

    pub fn validate(&self) -> Result<(), TcdError> {
        if self.feature_keys.is_empty() {
            return Err(TcdError::configuration(
                "feature_keys must name at least one column",
            ));
        }
        let mut seen = BTreeSet::new();
        for key in &self.feature_keys {
            if key.trim().is_empty() {
                return Err(TcdError::configuration("feature_keys must not be blank"));
            }
            if !seen.insert(key.as_str()) {
                return Err(TcdError::configuration(format!(
                    "feature key '{key}' is listed twice"
                )));
            }
        }

        match &self.parameters {
            ParameterSpace::Grid(grid) => grid.validate(),
            ParameterSpace::List(list) if list.is_empty() => Err(TcdError::configuration(
                "combinations must hold at least one entry",
            )),
            ParameterSpace::List(_) => Ok(()),
        }
    }

    pub fn combinations(&self) -> Result<Vec<ParameterCombination>, TcdError> {
        self.parameters.combinations()
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            sample_limit: self.sample_limit,
        }
    }

    /// Parses and validates a versioned JSON payload. Unknown top-level
    /// fields are logged and dropped.
    pub fn from_json(payload: &str) -> Result<Self, TcdError> {
        let wire: ExperimentConfigWire = serde_json::from_str(payload).map_err(|err| {
            TcdError::configuration(format!("experiment config is not valid: {err}"))
        })?;
        let (config, unknown_fields) = wire.into_runtime_parts()?;
        if !unknown_fields.is_empty() {
            let ignored: Vec<&str> = unknown_fields.keys().map(String::as_str).collect();
            tracing::warn!(?ignored, "ignoring unknown experiment config fields");
        }
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, TcdError> {
        serde_json::to_string_pretty(&ExperimentConfigWire::from_runtime(self.clone())).map_err(
            |err| TcdError::invalid_input(format!("experiment config failed to serialize: {err}")),
        )
    }
}

/// Wire format for versioned experiment config payloads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfigWire {
    pub schema_version: u32,
    pub detector: DetectorKind,
    #[serde(default = "default_feature_keys")]
    pub feature_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<ParameterGrid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combinations: Option<Vec<ParameterCombination>>,
    #[serde(default = "default_sample_limit")]
    pub sample_limit: usize,
    #[serde(default)]
    pub repro_mode: ReproMode,
    #[serde(default, flatten)]
    pub unknown_fields: UnknownFields,
}

impl ExperimentConfigWire {
    pub fn from_runtime(config: ExperimentConfig) -> Self {
        Self::from_runtime_with_unknown(config, CURRENT_SCHEMA_VERSION, UnknownFields::new())
    }

    pub fn from_runtime_with_unknown(
        config: ExperimentConfig,
        schema_version: u32,
        unknown_fields: UnknownFields,
    ) -> Self {
        let (grid, combinations) = match config.parameters {
            ParameterSpace::Grid(grid) => (Some(grid), None),
            ParameterSpace::List(list) => (None, Some(list)),
        };
        Self {
            schema_version,
            detector: config.detector,
            feature_keys: config.feature_keys,
            grid,
            combinations,
            sample_limit: config.sample_limit,
            repro_mode: config.repro_mode,
            unknown_fields,
        }
    }

    pub fn into_runtime_parts(self) -> Result<(ExperimentConfig, UnknownFields), TcdError> {
        validate_schema_version(self.schema_version, "ExperimentConfig")?;
        let parameters = match (self.grid, self.combinations) {
            (Some(_), Some(_)) => {
                return Err(TcdError::configuration(
                    "set either grid or combinations, not both",
                ));
            }
            (Some(grid), None) => ParameterSpace::Grid(grid),
            (None, Some(list)) => ParameterSpace::List(list),
            (None, None) => ParameterSpace::default(),
        };
        let config = ExperimentConfig {
            detector: self.detector,
            feature_keys: self.feature_keys,
            parameters,
            sample_limit: self.sample_limit,
            repro_mode: self.repro_mode,
        };
        config.validate()?;
        Ok((config, self.unknown_fields))
    }

    pub fn to_runtime(self) -> Result<ExperimentConfig, TcdError> {
        let (config, _) = self.into_runtime_parts()?;
        Ok(config)
    }
}

fn default_feature_keys() -> Vec<String> {
    DEFAULT_FEATURE_KEYS.iter().map(|key| key.to_string()).collect()
}

fn default_sample_limit() -> usize {
    RunOptions::default().sample_limit
}
