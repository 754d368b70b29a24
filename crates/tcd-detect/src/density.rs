// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::detector::OutlierDetector;
use crate::params::{ParamReader, ParamValue, ParameterCombination};
use crate::scale::StandardScaler;
use std::str::FromStr;
use tcd_core::{SampleMatrix, TcdError};

const DETECTOR_NAME: &str = "dbscan";

/// Distance used for eps-neighbourhoods.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    Manhattan,
    Chebyshev,
    /// Minkowski distance with the configured power `p`.
    Minkowski,
}

impl FromStr for DistanceMetric {
    type Err = TcdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "euclidean" | "l2" => Ok(Self::Euclidean),
            "manhattan" | "cityblock" | "l1" => Ok(Self::Manhattan),
            "chebyshev" | "infinity" => Ok(Self::Chebyshev),
            "minkowski" => Ok(Self::Minkowski),
            other => Err(TcdError::configuration(format!(
                "{DETECTOR_NAME}.metric '{other}' is not supported; expected euclidean, manhattan, chebyshev or minkowski"
            ))),
        }
    }
}

/// Configuration for [`DensityDetector`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct DensityConfig {
    pub eps: f64,
    pub min_samples: usize,
    pub metric: DistanceMetric,
    pub p: f64,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            eps: 0.5,
            min_samples: 5,
            metric: DistanceMetric::Euclidean,
            p: 2.0,
        }
    }
}

impl DensityConfig {
    pub fn validate(&self) -> Result<(), TcdError> {
        if !self.eps.is_finite() || self.eps <= 0.0 {
            return Err(TcdError::configuration(format!(
                "{DETECTOR_NAME}.eps must be finite and > 0; got {}",
                self.eps
            )));
        }
        if self.min_samples == 0 {
            return Err(TcdError::configuration(format!(
                "{DETECTOR_NAME}.min_samples must be >= 1; got 0"
            )));
        }
        if !self.p.is_finite() || self.p < 1.0 {
            return Err(TcdError::configuration(format!(
                "{DETECTOR_NAME}.p must be finite and >= 1; got {}",
                self.p
            )));
        }
        Ok(())
    }

    /// Parses a grid point; `algorithm`, `leaf_size` and `n_jobs` only tune
    /// neighbour search and are accepted without effect.
    pub fn from_params(combination: &ParameterCombination) -> Result<Self, TcdError> {
        let defaults = Self::default();
        let mut reader = ParamReader::new(DETECTOR_NAME, combination);

        let eps = reader.f64("eps")?.unwrap_or(defaults.eps);
        let min_samples = reader.usize("min_samples")?.unwrap_or(defaults.min_samples);
        let metric = match reader.raw("metric") {
            None => defaults.metric,
            Some(ParamValue::Text(name)) => name.parse()?,
            Some(other) => {
                return Err(TcdError::configuration(format!(
                    "{DETECTOR_NAME}.metric must be a string, got {other}"
                )));
            }
        };
        let p = reader.f64("p")?.unwrap_or(defaults.p);
        reader.accept(&["algorithm", "leaf_size", "n_jobs"]);
        reader.finish()?;

        let config = Self {
            eps,
            min_samples,
            metric,
            p,
        };
        config.validate()?;
        Ok(config)
    }

    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        let diffs = a.iter().zip(b).map(|(x, y)| (x - y).abs());
        match self.metric {
            DistanceMetric::Euclidean => diffs.map(|d| d * d).sum::<f64>().sqrt(),
            DistanceMetric::Manhattan => diffs.sum(),
            DistanceMetric::Chebyshev => diffs.fold(0.0, f64::max),
            DistanceMetric::Minkowski => diffs.map(|d| d.powf(self.p)).sum::<f64>().powf(1.0 / self.p),
        }
    }
}

/// DBSCAN noise detector over the standardised sample.
#[derive(Clone, Debug)]
pub struct DensityDetector {
    config: DensityConfig,
}

impl DensityDetector {
    pub fn new(config: DensityConfig) -> Result<Self, TcdError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DensityConfig {
        &self.config
    }

    /// Marks points that are neither core points nor inside the
    /// eps-neighbourhood of one.
    fn noise_mask(&self, scaled: &SampleMatrix) -> Vec<bool> {
        let n = scaled.rows();
        let mut neighbours: Vec<Vec<usize>> = vec![Vec::new(); n];
        for i in 0..n {
            for j in i..n {
                if self.config.distance(scaled.row(i), scaled.row(j)) <= self.config.eps {
                    neighbours[i].push(j);
                    if i != j {
                        neighbours[j].push(i);
                    }
                }
            }
        }
        let core: Vec<bool> = neighbours
            .iter()
            .map(|hood| hood.len() >= self.config.min_samples)
            .collect();
        neighbours
            .iter()
            .enumerate()
            .map(|(i, hood)| !core[i] && !hood.iter().any(|&j| core[j]))
            .collect()
    }
}

impl OutlierDetector for DensityDetector {
    fn name(&self) -> &'static str {
        DETECTOR_NAME
    }

    fn detect(&self, sample: &SampleMatrix) -> Result<Vec<bool>, TcdError> {
        sample.ensure_finite()?;
        if sample.rows() < self.config.min_samples {
            return Err(TcdError::precondition(format!(
                "{DETECTOR_NAME} needs at least min_samples={} rows, got {}",
                self.config.min_samples,
                sample.rows()
            )));
        }
        let scaled = StandardScaler::fit_transform(sample)?;
        Ok(self.noise_mask(&scaled))
    }
}
