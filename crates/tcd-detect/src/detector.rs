// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::density::{DensityConfig, DensityDetector};
use crate::isolation::{IsolationForestConfig, IsolationForestDetector};
use crate::params::ParameterCombination;
use crate::robust::{RobustDistanceConfig, RobustDistanceDetector};
use std::fmt;
use std::str::FromStr;
use tcd_core::{SampleMatrix, TcdError};

/// Marks the rows of one date's sample that are outliers.
///
/// Implementations hold no fitted state between calls; the same detector is
/// applied to every date of a run, possibly from several threads.
pub trait OutlierDetector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Seed driving any randomness, when the detector has one.
    fn seed(&self) -> Option<u64> {
        None
    }

    /// Returns a mask with one entry per row; `true` marks an outlier.
    fn detect(&self, sample: &SampleMatrix) -> Result<Vec<bool>, TcdError>;
}

impl<T: OutlierDetector + ?Sized> OutlierDetector for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn seed(&self) -> Option<u64> {
        (**self).seed()
    }

    fn detect(&self, sample: &SampleMatrix) -> Result<Vec<bool>, TcdError> {
        (**self).detect(sample)
    }
}

/// Builds a detector for one parameter combination.
pub trait DetectorFactory: Send + Sync {
    type Detector: OutlierDetector;

    fn build(&self, combination: &ParameterCombination) -> Result<Self::Detector, TcdError>;
}

/// Detector strategy selector.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DetectorKind {
    #[cfg_attr(feature = "serde", serde(rename = "dbscan", alias = "density"))]
    Density,
    #[cfg_attr(feature = "serde", serde(rename = "mahalanobis", alias = "robust"))]
    RobustDistance,
    #[cfg_attr(
        feature = "serde",
        serde(rename = "isolation_forest", alias = "isolation")
    )]
    IsolationForest,
}

impl DetectorKind {
    pub const ALL: [Self; 3] = [Self::Density, Self::RobustDistance, Self::IsolationForest];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Density => "dbscan",
            Self::RobustDistance => "mahalanobis",
            Self::IsolationForest => "isolation_forest",
        }
    }

    /// Validates a combination against this strategy's parameter schema.
    pub fn configure(self, combination: &ParameterCombination) -> Result<DetectorConfig, TcdError> {
        Ok(match self {
            Self::Density => DetectorConfig::Density(DensityConfig::from_params(combination)?),
            Self::RobustDistance => {
                DetectorConfig::RobustDistance(RobustDistanceConfig::from_params(combination)?)
            }
            Self::IsolationForest => {
                DetectorConfig::IsolationForest(IsolationForestConfig::from_params(combination)?)
            }
        })
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectorKind {
    type Err = TcdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "dbscan" | "density" => Ok(Self::Density),
            "mahalanobis" | "robust" => Ok(Self::RobustDistance),
            "isolation_forest" | "isolation" => Ok(Self::IsolationForest),
            other => Err(TcdError::configuration(format!(
                "unknown detector '{other}'; expected dbscan, mahalanobis or isolation_forest"
            ))),
        }
    }
}

/// Validated configuration of one detector variant.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
#[derive(Clone, Debug, PartialEq)]
pub enum DetectorConfig {
    Density(DensityConfig),
    RobustDistance(RobustDistanceConfig),
    IsolationForest(IsolationForestConfig),
}

impl DetectorConfig {
    pub fn kind(&self) -> DetectorKind {
        match self {
            Self::Density(_) => DetectorKind::Density,
            Self::RobustDistance(_) => DetectorKind::RobustDistance,
            Self::IsolationForest(_) => DetectorKind::IsolationForest,
        }
    }
}

/// Closed set of built-in detectors.
#[derive(Clone, Debug)]
pub enum Detector {
    Density(DensityDetector),
    RobustDistance(RobustDistanceDetector),
    IsolationForest(IsolationForestDetector),
}

impl Detector {
    pub fn new(config: DetectorConfig) -> Result<Self, TcdError> {
        Ok(match config {
            DetectorConfig::Density(config) => Self::Density(DensityDetector::new(config)?),
            DetectorConfig::RobustDistance(config) => {
                Self::RobustDistance(RobustDistanceDetector::new(config)?)
            }
            DetectorConfig::IsolationForest(config) => {
                Self::IsolationForest(IsolationForestDetector::new(config)?)
            }
        })
    }

    pub fn kind(&self) -> DetectorKind {
        match self {
            Self::Density(_) => DetectorKind::Density,
            Self::RobustDistance(_) => DetectorKind::RobustDistance,
            Self::IsolationForest(_) => DetectorKind::IsolationForest,
        }
    }

    fn inner(&self) -> &dyn OutlierDetector {
        match self {
            Self::Density(detector) => detector,
            Self::RobustDistance(detector) => detector,
            Self::IsolationForest(detector) => detector,
        }
    }
}

impl OutlierDetector for Detector {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn seed(&self) -> Option<u64> {
        self.inner().seed()
    }

    fn detect(&self, sample: &SampleMatrix) -> Result<Vec<bool>, TcdError> {
        self.inner().detect(sample)
    }
}

impl DetectorFactory for DetectorKind {
    type Detector = Detector;

    fn build(&self, combination: &ParameterCombination) -> Result<Detector, TcdError> {
        Detector::new(self.configure(combination)?)
    }
}
