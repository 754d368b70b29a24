// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use chrono::{Days, NaiveDate};
use tcd_core::{DEFAULT_FEATURE_KEYS, FeatureTable, GroundTruth, SampleMatrix, TcdError};

fn lcg_next(state: &mut u64) -> u64 {
    *state = state
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    *state
}

/// Uniform draw in `[-1, 1)`.
fn lcg_unit(state: &mut u64) -> f64 {
    (lcg_next(state) >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
}

/// Clustered rows with every tenth row pushed far out.
pub fn synthetic_sample(rows: usize, cols: usize, seed: u64) -> Result<SampleMatrix, TcdError> {
    let mut state = seed;
    let mut values = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        let offset = if row % 10 == 9 { 8.0 } else { 0.0 };
        for _ in 0..cols {
            values.push(offset + lcg_unit(&mut state));
        }
    }
    SampleMatrix::new(values, rows, cols)
}

/// Inputs for end-to-end benches: `fields` fields observed every 12 days over
/// `dates` dates, with an event on every 7th field midway through.
pub struct Scenario {
    pub features: FeatureTable,
    pub ground_truth: GroundTruth,
}

pub fn synthetic_scenario(fields: u32, dates: u64, seed: u64) -> Result<Scenario, TcdError> {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1)
        .ok_or_else(|| TcdError::invalid_input("invalid bench start date"))?;
    let mut state = seed;
    let mut features = FeatureTable::new(DEFAULT_FEATURE_KEYS)?;
    let mut ground_truth = GroundTruth::with_field_range(fields);
    let event_step = dates / 2;

    for step in 0..dates {
        let date = start + Days::new(step * 12);
        for field_id in 0..fields {
            let tilled = field_id % 7 == 0 && step == event_step;
            let shift = if tilled { 6.0 } else { 0.0 };
            let row: Vec<f64> = (0..DEFAULT_FEATURE_KEYS.len())
                .map(|_| shift + lcg_unit(&mut state))
                .collect();
            features.insert(date, field_id, row)?;
            if tilled {
                ground_truth.add_event(field_id, date - Days::new(3))?;
            }
        }
    }
    Ok(Scenario {
        features,
        ground_truth,
    })
}

/// Benchmark fixtures for tcd-rs.
pub fn crate_name() -> &'static str {
    "tcd-bench"
}
