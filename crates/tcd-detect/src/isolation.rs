// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::detector::OutlierDetector;
use crate::params::{ParamReader, ParamValue, ParameterCombination};
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tcd_core::{SampleMatrix, TcdError};

const DETECTOR_NAME: &str = "isolation_forest";
const AUTO_MAX_SAMPLES: usize = 256;
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Rows drawn for each tree.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum MaxSamples {
    /// `min(256, rows)`.
    #[default]
    Auto,
    Count(usize),
    Fraction(f64),
}

/// How the outlier cutoff is derived from the anomaly scores.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Contamination {
    /// Anomalous when the score exceeds 0.5.
    #[default]
    Auto,
    /// Expected share of outliers; the cutoff is that score percentile.
    Fraction(f64),
}

/// Features drawn for each tree.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MaxFeatures {
    Count(usize),
    Fraction(f64),
}

impl Default for MaxFeatures {
    fn default() -> Self {
        Self::Fraction(1.0)
    }
}

/// Configuration for [`IsolationForestDetector`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct IsolationForestConfig {
    pub n_estimators: usize,
    pub max_samples: MaxSamples,
    pub contamination: Contamination,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    /// `None` draws a fresh seed per detection.
    pub random_state: Option<u64>,
}

impl Default for IsolationForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: MaxSamples::Auto,
            contamination: Contamination::Auto,
            max_features: MaxFeatures::default(),
            bootstrap: false,
            random_state: None,
        }
    }
}

impl IsolationForestConfig {
    pub fn validate(&self) -> Result<(), TcdError> {
        if self.n_estimators == 0 {
            return Err(TcdError::configuration(format!(
                "{DETECTOR_NAME}.n_estimators must be >= 1; got 0"
            )));
        }
        match self.max_samples {
            MaxSamples::Count(0) => {
                return Err(TcdError::configuration(format!(
                    "{DETECTOR_NAME}.max_samples must be >= 1 when given as a count"
                )));
            }
            MaxSamples::Fraction(f) if !(f > 0.0 && f <= 1.0) => {
                return Err(TcdError::configuration(format!(
                    "{DETECTOR_NAME}.max_samples fraction must be in (0, 1]; got {f}"
                )));
            }
            _ => {}
        }
        if let Contamination::Fraction(c) = self.contamination
            && !(c > 0.0 && c <= 0.5)
        {
            return Err(TcdError::configuration(format!(
                "{DETECTOR_NAME}.contamination must be in (0, 0.5]; got {c}"
            )));
        }
        match self.max_features {
            MaxFeatures::Count(0) => Err(TcdError::configuration(format!(
                "{DETECTOR_NAME}.max_features must be >= 1 when given as a count"
            ))),
            MaxFeatures::Fraction(f) if !(f > 0.0 && f <= 1.0) => {
                Err(TcdError::configuration(format!(
                    "{DETECTOR_NAME}.max_features fraction must be in (0, 1]; got {f}"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Parses a grid point. `warm_start`, `n_jobs` and `verbose` are accepted
    /// and have no effect: every detection fits a fresh forest.
    pub fn from_params(combination: &ParameterCombination) -> Result<Self, TcdError> {
        let defaults = Self::default();
        let mut reader = ParamReader::new(DETECTOR_NAME, combination);

        let n_estimators = reader.usize("n_estimators")?.unwrap_or(defaults.n_estimators);
        let max_samples = match reader.raw("max_samples") {
            None => defaults.max_samples,
            Some(ParamValue::Text(text)) if text == "auto" => MaxSamples::Auto,
            Some(ParamValue::Int(count)) => {
                MaxSamples::Count(non_negative(&reader, "max_samples", *count)?)
            }
            Some(ParamValue::Float(fraction)) => MaxSamples::Fraction(*fraction),
            Some(other) => {
                return Err(shape_error(&reader, "max_samples", "\"auto\" or a number", other));
            }
        };
        let contamination = match reader.raw("contamination") {
            None => defaults.contamination,
            Some(ParamValue::Text(text)) if text == "auto" => Contamination::Auto,
            Some(ParamValue::Float(fraction)) => Contamination::Fraction(*fraction),
            Some(other) => {
                return Err(shape_error(&reader, "contamination", "\"auto\" or a float", other));
            }
        };
        let max_features = match reader.raw("max_features") {
            None => defaults.max_features,
            Some(ParamValue::Int(count)) => {
                MaxFeatures::Count(non_negative(&reader, "max_features", *count)?)
            }
            Some(ParamValue::Float(fraction)) => MaxFeatures::Fraction(*fraction),
            Some(other) => return Err(shape_error(&reader, "max_features", "a number", other)),
        };
        let bootstrap = reader.bool("bootstrap")?.unwrap_or(defaults.bootstrap);
        let random_state = reader.u64("random_state")?;
        reader.accept(&["warm_start", "n_jobs", "verbose"]);
        reader.finish()?;

        let config = Self {
            n_estimators,
            max_samples,
            contamination,
            max_features,
            bootstrap,
            random_state,
        };
        config.validate()?;
        Ok(config)
    }

    fn samples_per_tree(&self, rows: usize) -> usize {
        match self.max_samples {
            MaxSamples::Auto => AUTO_MAX_SAMPLES.min(rows),
            MaxSamples::Count(count) => count.min(rows),
            MaxSamples::Fraction(fraction) => (fraction * rows as f64) as usize,
        }
    }

    fn features_per_tree(&self, cols: usize) -> Result<usize, TcdError> {
        match self.max_features {
            MaxFeatures::Count(count) if count > cols => Err(TcdError::configuration(format!(
                "{DETECTOR_NAME}.max_features={count} exceeds the {cols} available features"
            ))),
            MaxFeatures::Count(count) => Ok(count),
            MaxFeatures::Fraction(fraction) => Ok(((fraction * cols as f64) as usize).max(1)),
        }
    }
}

fn non_negative(reader: &ParamReader<'_>, key: &str, value: i64) -> Result<usize, TcdError> {
    usize::try_from(value).map_err(|_| {
        TcdError::configuration(format!(
            "{}.{key} must be a non-negative integer, got {value}",
            reader.detector()
        ))
    })
}

fn shape_error(reader: &ParamReader<'_>, key: &str, expected: &str, got: &ParamValue) -> TcdError {
    TcdError::configuration(format!(
        "{}.{key} must be {expected}, got {got}",
        reader.detector()
    ))
}

/// Average path length of an unsuccessful binary-search-tree lookup among
/// `n` points.
pub(crate) fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Clone, Debug)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

/// One isolation tree over a subset of rows and features.
#[derive(Clone, Debug)]
struct IsolationTree {
    nodes: Vec<Node>,
    features: Vec<usize>,
}

impl IsolationTree {
    fn fit(
        sample: &SampleMatrix,
        rows: Vec<usize>,
        features: Vec<usize>,
        max_depth: usize,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            features,
        };
        tree.grow(sample, rows, 0, max_depth, rng);
        tree
    }

    fn grow(
        &mut self,
        sample: &SampleMatrix,
        rows: Vec<usize>,
        depth: usize,
        max_depth: usize,
        rng: &mut ChaCha8Rng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { size: rows.len() });
        if depth >= max_depth || rows.len() <= 1 {
            return id;
        }

        let mut candidates: Vec<(usize, f64, f64)> = self
            .features
            .iter()
            .filter_map(|&feature| {
                let (lo, hi) = rows.iter().fold(
                    (f64::INFINITY, f64::NEG_INFINITY),
                    |(lo, hi), &r| {
                        let v = sample.get(r, feature);
                        (lo.min(v), hi.max(v))
                    },
                );
                (hi > lo).then_some((feature, lo, hi))
            })
            .collect();
        if candidates.is_empty() {
            return id;
        }
        let (feature, lo, hi) = candidates.swap_remove(rng.gen_range(0..candidates.len()));
        // Halved span stays finite even when `hi - lo` overflows.
        let u: f64 = rng.r#gen();
        let half = hi * 0.5 - lo * 0.5;
        let mut threshold = lo + u * half + u * half;
        if !(lo..hi).contains(&threshold) {
            threshold = lo;
        }

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| sample.get(r, feature) <= threshold);
        let left = self.grow(sample, left_rows, depth + 1, max_depth, rng);
        let right = self.grow(sample, right_rows, depth + 1, max_depth, rng);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    fn path_length(&self, row: &[f64]) -> f64 {
        let mut id = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[id] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if row[*feature] <= *threshold { *left } else { *right };
                    depth += 1.0;
                }
                Node::Leaf { size } => return depth + average_path_length(*size),
            }
        }
    }
}

/// Isolation forest refitted on every sample it scores.
#[derive(Clone, Debug)]
pub struct IsolationForestDetector {
    config: IsolationForestConfig,
}

impl IsolationForestDetector {
    pub fn new(config: IsolationForestConfig) -> Result<Self, TcdError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &IsolationForestConfig {
        &self.config
    }

    /// Anomaly scores `2^(-E[h(x)] / c(psi))` in `(0, 1]`; higher is more
    /// anomalous.
    pub fn scores(&self, sample: &SampleMatrix) -> Result<Vec<f64>, TcdError> {
        sample.ensure_finite()?;
        let (n, p) = (sample.rows(), sample.cols());
        if n < 2 {
            return Err(TcdError::precondition(format!(
                "{DETECTOR_NAME} needs at least 2 rows, got {n}"
            )));
        }
        let psi = self.config.samples_per_tree(n);
        if psi < 2 {
            return Err(TcdError::precondition(format!(
                "{DETECTOR_NAME} draws {psi} rows per tree from {n}; at least 2 are needed"
            )));
        }
        let n_features = self.config.features_per_tree(p)?;
        let max_depth = (psi as f64).log2().ceil() as usize;

        let mut rng = match self.config.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::seed_from_u64(rand::random()),
        };

        let trees: Vec<IsolationTree> = (0..self.config.n_estimators)
            .map(|_| {
                let mut tree_rng = ChaCha8Rng::seed_from_u64(rng.r#gen());
                let rows = if self.config.bootstrap {
                    (0..psi).map(|_| tree_rng.gen_range(0..n)).collect()
                } else {
                    index::sample(&mut tree_rng, n, psi).into_vec()
                };
                let mut features = index::sample(&mut tree_rng, p, n_features).into_vec();
                features.sort_unstable();
                IsolationTree::fit(sample, rows, features, max_depth, &mut tree_rng)
            })
            .collect();

        let normaliser = average_path_length(psi);
        Ok(sample
            .iter_rows()
            .map(|row| {
                let mean_depth =
                    trees.iter().map(|tree| tree.path_length(row)).sum::<f64>() / trees.len() as f64;
                2f64.powf(-mean_depth / normaliser)
            })
            .collect())
    }
}

/// Linear-interpolation percentile of `values`, `q` in `[0, 100]`.
fn percentile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

impl OutlierDetector for IsolationForestDetector {
    fn name(&self) -> &'static str {
        DETECTOR_NAME
    }

    fn seed(&self) -> Option<u64> {
        self.config.random_state
    }

    fn detect(&self, sample: &SampleMatrix) -> Result<Vec<bool>, TcdError> {
        let scores = self.scores(sample)?;
        let mask = match self.config.contamination {
            Contamination::Auto => scores.iter().map(|s| *s > 0.5).collect(),
            Contamination::Fraction(fraction) => {
                let negated: Vec<f64> = scores.iter().map(|s| -s).collect();
                let offset = percentile(&negated, 100.0 * fraction);
                negated.iter().map(|s| *s < offset).collect()
            }
        };
        Ok(mask)
    }
}
