// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use tcd_core::{SampleMatrix, TcdError};

/// Column-wise zero-mean / unit-variance scaling fitted on one sample.
#[derive(Clone, Debug, PartialEq)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    /// Fits means and population standard deviations per column.
    ///
    /// Columns whose deviation is below `10 * f64::EPSILON` keep a scale of 1
    /// so constant features are centred but not blown up.
    pub fn fit(sample: &SampleMatrix) -> Self {
        let rows = sample.rows();
        let cols = sample.cols();
        let mut mean = vec![0.0; cols];
        let mut scale = vec![1.0; cols];
        if rows == 0 {
            return Self { mean, scale };
        }

        let n = rows as f64;
        for row in sample.iter_rows() {
            for (acc, value) in mean.iter_mut().zip(row) {
                *acc += value;
            }
        }
        for acc in &mut mean {
            *acc /= n;
        }

        let mut var = vec![0.0; cols];
        for row in sample.iter_rows() {
            for ((acc, value), mu) in var.iter_mut().zip(row).zip(&mean) {
                let diff = value - mu;
                *acc += diff * diff;
            }
        }
        for (s, v) in scale.iter_mut().zip(&var) {
            let std = (v / n).sqrt();
            *s = if std < 10.0 * f64::EPSILON { 1.0 } else { std };
        }

        Self { mean, scale }
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    pub fn transform(&self, sample: &SampleMatrix) -> Result<SampleMatrix, TcdError> {
        if sample.cols() != self.mean.len() {
            return Err(TcdError::invalid_input(format!(
                "scaler fitted on {} columns, sample has {}",
                self.mean.len(),
                sample.cols()
            )));
        }
        let mut values = Vec::with_capacity(sample.values().len());
        for row in sample.iter_rows() {
            for ((value, mu), s) in row.iter().zip(&self.mean).zip(&self.scale) {
                values.push((value - mu) / s);
            }
        }
        SampleMatrix::new(values, sample.rows(), sample.cols())
    }

    pub fn fit_transform(sample: &SampleMatrix) -> Result<SampleMatrix, TcdError> {
        Self::fit(sample).transform(sample)
    }
}
