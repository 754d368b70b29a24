// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::detector::OutlierDetector;
use crate::params::{ParamReader, ParameterCombination};
use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand::seq::index;
use rand_chacha::ChaCha8Rng;
use statrs::distribution::{ChiSquared, ContinuousCDF};
use tcd_core::{SampleMatrix, TcdError};

const DETECTOR_NAME: &str = "mahalanobis";
const DEFAULT_SEED: u64 = 1234;
const N_TRIALS: usize = 30;
const N_BEST: usize = 10;
const SHORT_C_STEPS: usize = 2;
const FULL_C_STEPS: usize = 30;
const REWEIGHT_QUANTILE: f64 = 0.975;

/// Configuration for [`RobustDistanceDetector`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct RobustDistanceConfig {
    /// Two-sided significance level; the cutoff is `chi2.ppf(1 - alpha / 2)`.
    pub alpha: f64,
    pub random_state: u64,
    /// Share of rows in the MCD support; `None` uses `(n + p + 1) / 2`.
    pub support_fraction: Option<f64>,
}

impl Default for RobustDistanceConfig {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            random_state: DEFAULT_SEED,
            support_fraction: None,
        }
    }
}

impl RobustDistanceConfig {
    pub fn validate(&self) -> Result<(), TcdError> {
        if !self.alpha.is_finite() || self.alpha <= 0.0 || self.alpha >= 1.0 {
            return Err(TcdError::configuration(format!(
                "{DETECTOR_NAME}.alpha must be in (0, 1); got {}",
                self.alpha
            )));
        }
        if let Some(fraction) = self.support_fraction
            && (!fraction.is_finite() || fraction <= 0.0 || fraction > 1.0)
        {
            return Err(TcdError::configuration(format!(
                "{DETECTOR_NAME}.support_fraction must be in (0, 1]; got {fraction}"
            )));
        }
        Ok(())
    }

    pub fn from_params(combination: &ParameterCombination) -> Result<Self, TcdError> {
        let defaults = Self::default();
        let mut reader = ParamReader::new(DETECTOR_NAME, combination);
        let alpha = reader
            .f64_any(&["alpha", "p_values"])?
            .unwrap_or(defaults.alpha);
        let random_state = reader.u64("random_state")?.unwrap_or(defaults.random_state);
        let support_fraction = reader.f64("support_fraction")?;
        reader.finish()?;

        let config = Self {
            alpha,
            random_state,
            support_fraction,
        };
        config.validate()?;
        Ok(config)
    }

    /// Squared-distance cutoff for `features` degrees of freedom.
    pub fn threshold(&self, features: usize) -> Result<f64, TcdError> {
        chi2_quantile(features, 1.0 - self.alpha / 2.0)
    }
}

/// Robust location and scatter of one sample.
#[derive(Clone, Debug)]
pub struct McdEstimate {
    pub location: DVector<f64>,
    pub covariance: DMatrix<f64>,
    pub support: Vec<bool>,
}

/// Flags rows whose squared Mahalanobis distance under the MCD estimate
/// exceeds a chi-square quantile.
#[derive(Clone, Debug)]
pub struct RobustDistanceDetector {
    config: RobustDistanceConfig,
}

impl RobustDistanceDetector {
    pub fn new(config: RobustDistanceConfig) -> Result<Self, TcdError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RobustDistanceConfig {
        &self.config
    }

    /// Reweighted MCD estimate of `sample`.
    pub fn estimate(&self, sample: &SampleMatrix) -> Result<McdEstimate, TcdError> {
        let x = to_matrix(sample);
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.random_state);
        min_cov_det(&x, self.config.support_fraction, &mut rng)
    }
}

impl OutlierDetector for RobustDistanceDetector {
    fn name(&self) -> &'static str {
        DETECTOR_NAME
    }

    fn seed(&self) -> Option<u64> {
        Some(self.config.random_state)
    }

    fn detect(&self, sample: &SampleMatrix) -> Result<Vec<bool>, TcdError> {
        sample.ensure_finite()?;
        let (n, p) = (sample.rows(), sample.cols());
        if n <= p {
            return Err(TcdError::precondition(format!(
                "{DETECTOR_NAME} needs more rows than features ({p}), got {n}"
            )));
        }
        if sample.has_identical_rows() {
            return Ok(vec![false; n]);
        }

        let threshold = self.config.threshold(p)?;
        let estimate = self.estimate(sample)?;
        let precision = pinv(&estimate.covariance)?;
        let distances = squared_distances(&to_matrix(sample), &estimate.location, &precision);
        Ok(distances.into_iter().map(|d| d > threshold).collect())
    }
}

fn chi2_quantile(df: usize, probability: f64) -> Result<f64, TcdError> {
    let dist = ChiSquared::new(df as f64).map_err(|err| {
        TcdError::numerical_issue(format!("chi-square with {df} degrees of freedom: {err}"))
    })?;
    let quantile = dist.inverse_cdf(probability);
    if !quantile.is_finite() {
        return Err(TcdError::numerical_issue(format!(
            "chi-square quantile at {probability} with {df} degrees of freedom is not finite"
        )));
    }
    Ok(quantile)
}

fn to_matrix(sample: &SampleMatrix) -> DMatrix<f64> {
    DMatrix::from_row_slice(sample.rows(), sample.cols(), sample.values())
}

/// Moore-Penrose pseudo-inverse with the relative cutoff `max_sv * eps * dim`.
fn pinv(matrix: &DMatrix<f64>) -> Result<DMatrix<f64>, TcdError> {
    let svd = matrix.clone().svd(true, true);
    let max_sv = svd.singular_values.iter().copied().fold(0.0, f64::max);
    let cutoff = max_sv * f64::EPSILON * matrix.nrows().max(matrix.ncols()) as f64;
    svd.pseudo_inverse(cutoff)
        .map_err(|err| TcdError::numerical_issue(format!("pseudo-inverse failed: {err}")))
}

/// Log-determinant, or `-inf` when the matrix is not positive definite.
fn log_det(matrix: &DMatrix<f64>) -> f64 {
    match matrix.clone().cholesky() {
        Some(chol) => {
            2.0 * chol
                .l_dirty()
                .diagonal()
                .iter()
                .map(|v| v.ln())
                .sum::<f64>()
        }
        None => f64::NEG_INFINITY,
    }
}

fn squared_distances(
    x: &DMatrix<f64>,
    location: &DVector<f64>,
    precision: &DMatrix<f64>,
) -> Vec<f64> {
    (0..x.nrows())
        .map(|i| {
            let centered = x.row(i).transpose() - location;
            centered.dot(&(precision * &centered))
        })
        .collect()
}

fn mean_and_cov(x: &DMatrix<f64>, rows: &[usize]) -> (DVector<f64>, DMatrix<f64>) {
    let p = x.ncols();
    let n = rows.len() as f64;
    let mut location = DVector::zeros(p);
    for &i in rows {
        location += x.row(i).transpose();
    }
    location /= n;
    let mut covariance = DMatrix::zeros(p, p);
    for &i in rows {
        let centered = x.row(i).transpose() - &location;
        covariance += &centered * centered.transpose();
    }
    covariance /= n;
    (location, covariance)
}

fn smallest(distances: &[f64], count: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..distances.len()).collect();
    order.sort_by(|&a, &b| distances[a].total_cmp(&distances[b]));
    order.truncate(count);
    order.sort_unstable();
    order
}

fn mask_of(rows: &[usize], n: usize) -> Vec<bool> {
    let mut mask = vec![false; n];
    for &i in rows {
        mask[i] = true;
    }
    mask
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        0.5 * (sorted[mid - 1] + sorted[mid])
    } else {
        sorted[mid]
    }
}

fn all_close(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    (a - b).abs() <= 1e-8 + 1e-5 * b.abs()
}

#[derive(Clone, Debug)]
struct Candidate {
    location: DVector<f64>,
    covariance: DMatrix<f64>,
    log_det: f64,
    support: Vec<usize>,
}

impl Candidate {
    fn from_support(x: &DMatrix<f64>, support: Vec<usize>) -> Self {
        let (location, covariance) = mean_and_cov(x, &support);
        let log_det = log_det(&covariance);
        Self {
            location,
            covariance,
            log_det,
            support,
        }
    }
}

/// Concentration steps from a starting estimate until the determinant stops
/// decreasing or `max_iter` steps ran.
fn c_steps(
    x: &DMatrix<f64>,
    n_support: usize,
    start: Candidate,
    max_iter: usize,
) -> Result<Candidate, TcdError> {
    let mut current = start;
    let mut remaining = max_iter;
    let mut previous: Option<Candidate> = None;

    while remaining > 0 && current.log_det.is_finite() {
        if let Some(prev) = &previous
            && current.log_det >= prev.log_det
        {
            break;
        }
        let precision = pinv(&current.covariance)?;
        let distances = squared_distances(x, &current.location, &precision);
        let next = Candidate::from_support(x, smallest(&distances, n_support));
        previous = Some(current);
        current = next;
        remaining -= 1;
    }

    let Some(prev) = previous else {
        return Ok(current);
    };
    if remaining > 0 && current.log_det > prev.log_det {
        return Ok(prev);
    }
    Ok(current)
}

fn select_best(mut candidates: Vec<Candidate>, keep: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| a.log_det.total_cmp(&b.log_det));
    candidates.truncate(keep);
    candidates
}

fn support_size(n: usize, p: usize, support_fraction: Option<f64>) -> usize {
    let size = match support_fraction {
        Some(fraction) => (fraction * n as f64) as usize,
        None => (0.5 * (n + p + 1) as f64).ceil() as usize,
    };
    size.clamp(1, n)
}

/// Exact univariate MCD: the shortest window holding `n_support` points.
fn univariate_raw(x: &DMatrix<f64>, n_support: usize) -> Candidate {
    let n = x.nrows();
    let column: Vec<f64> = x.column(0).iter().copied().collect();
    if n_support >= n {
        return Candidate::from_support(x, (0..n).collect());
    }

    let mut sorted = column.clone();
    sorted.sort_by(f64::total_cmp);
    let widths: Vec<f64> = (0..n - n_support)
        .map(|i| sorted[i + n_support] - sorted[i])
        .collect();
    let min_width = widths.iter().copied().fold(f64::INFINITY, f64::min);
    let starts: Vec<usize> = widths
        .iter()
        .enumerate()
        .filter(|(_, width)| **width == min_width)
        .map(|(i, _)| i)
        .collect();
    let centre = starts
        .iter()
        .map(|&i| 0.5 * (sorted[i + n_support] + sorted[i]))
        .sum::<f64>()
        / starts.len() as f64;

    let offsets: Vec<f64> = column.iter().map(|v| (v - centre).abs()).collect();
    let support = smallest(&offsets, n_support);
    let (_, covariance) = mean_and_cov(x, &support);
    let log_det = log_det(&covariance);
    Candidate {
        location: DVector::from_element(1, centre),
        covariance,
        log_det,
        support,
    }
}

/// FastMCD raw estimate: random h-subsets refined by concentration steps.
fn fast_mcd_raw(
    x: &DMatrix<f64>,
    n_support: usize,
    rng: &mut ChaCha8Rng,
) -> Result<Candidate, TcdError> {
    let n = x.nrows();
    if x.ncols() == 1 {
        return Ok(univariate_raw(x, n_support));
    }

    let mut trials = Vec::with_capacity(N_TRIALS);
    for _ in 0..N_TRIALS {
        let mut subset = index::sample(rng, n, n_support).into_vec();
        subset.sort_unstable();
        let start = Candidate::from_support(x, subset);
        trials.push(c_steps(x, n_support, start, SHORT_C_STEPS)?);
    }

    let mut refined = Vec::with_capacity(N_BEST);
    for candidate in select_best(trials, N_BEST) {
        let precision = pinv(&candidate.covariance)?;
        let distances = squared_distances(x, &candidate.location, &precision);
        let start = Candidate::from_support(x, smallest(&distances, n_support));
        refined.push(c_steps(x, n_support, start, FULL_C_STEPS)?);
    }

    select_best(refined, 1)
        .into_iter()
        .next()
        .ok_or_else(|| TcdError::numerical_issue("FastMCD produced no candidate"))
}

/// Minimum Covariance Determinant with consistency correction and one
/// reweighting step.
pub(crate) fn min_cov_det(
    x: &DMatrix<f64>,
    support_fraction: Option<f64>,
    rng: &mut ChaCha8Rng,
) -> Result<McdEstimate, TcdError> {
    let (n, p) = (x.nrows(), x.ncols());
    let n_support = support_size(n, p, support_fraction);
    let raw = fast_mcd_raw(x, n_support, rng)?;

    if raw.support.len() < n && raw.covariance.iter().all(|v| all_close(*v, 0.0)) {
        return Err(TcdError::precondition(
            "covariance of the MCD support is zero; the sample has too few distinct rows",
        ));
    }

    let precision = pinv(&raw.covariance)?;
    let raw_distances = squared_distances(x, &raw.location, &precision);
    let correction = median(&raw_distances) / chi2_quantile(p, 0.5)?;
    if !correction.is_finite() || correction <= 0.0 {
        return Err(TcdError::precondition(format!(
            "MCD consistency correction is degenerate ({correction})"
        )));
    }
    let corrected: Vec<f64> = raw_distances.iter().map(|d| d / correction).collect();

    let cutoff = chi2_quantile(p, REWEIGHT_QUANTILE)?;
    let kept: Vec<usize> = (0..n).filter(|&i| corrected[i] < cutoff).collect();
    if kept.is_empty() {
        return Err(TcdError::precondition(
            "MCD reweighting kept no rows under the chi-square cutoff",
        ));
    }
    let (location, covariance) = mean_and_cov(x, &kept);
    if covariance.iter().any(|v| !v.is_finite()) {
        return Err(TcdError::numerical_issue("reweighted covariance is not finite"));
    }

    Ok(McdEstimate {
        location,
        covariance,
        support: mask_of(&kept, n),
    })
}
