// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::repro::ReproMode;
use chrono::NaiveDate;
use std::borrow::Cow;

/// Diagnostics schema version for run metadata.
pub const DIAGNOSTICS_SCHEMA_VERSION: u32 = 1;

/// A date left out of aggregation because the detector refused its sample.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedDate {
    pub date: NaiveDate,
    pub reason: String,
}

/// Counters collected while folding per-date detector output.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregationDiagnostics {
    pub dates_processed: usize,
    pub dates_skipped: Vec<SkippedDate>,
    pub flags_emitted: usize,
    /// Worker threads when dates ran in parallel; `None` when sequential.
    #[cfg_attr(feature = "serde", serde(default))]
    pub thread_count: Option<usize>,
}

impl AggregationDiagnostics {
    pub fn skipped_count(&self) -> usize {
        self.dates_skipped.len()
    }
}

/// Structured diagnostics for one parameter combination.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct RunDiagnostics {
    pub schema_version: u32,
    pub engine_version: Option<String>,
    pub detector: Cow<'static, str>,
    pub seed: Option<u64>,
    pub repro_mode: ReproMode,
    pub runtime_ms: Option<u64>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub thread_count: Option<usize>,
    pub aggregation: AggregationDiagnostics,
    pub flags_without_window: usize,
    pub notes: Vec<String>,
    pub warnings: Vec<String>,
}

impl Default for RunDiagnostics {
    fn default() -> Self {
        Self {
            schema_version: DIAGNOSTICS_SCHEMA_VERSION,
            engine_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            detector: Cow::Borrowed(""),
            seed: None,
            repro_mode: ReproMode::Balanced,
            runtime_ms: None,
            thread_count: None,
            aggregation: AggregationDiagnostics::default(),
            flags_without_window: 0,
            notes: vec![],
            warnings: vec![],
        }
    }
}
