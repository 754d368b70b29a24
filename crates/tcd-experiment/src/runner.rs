// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::config::ExperimentConfig;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize, Serializer};
use std::borrow::Cow;
#[cfg(feature = "rayon")]
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tcd_core::{
    DEFAULT_FEATURE_KEYS, ExecutionContext, FeatureTable, FieldId, GroundTruth, IntervalTable,
    RunDiagnostics, TcdError, WindowedFlag,
};
use tcd_detect::{DetectorFactory, OutlierDetector, ParameterCombination, aggregate};
use tcd_eval::{Score, evaluate, score};

/// Read-only tables shared by every combination of a run.
#[derive(Clone, Debug)]
pub struct ExperimentInputs<'a> {
    pub features: &'a FeatureTable,
    pub ground_truth: &'a GroundTruth,
    pub intervals: &'a IntervalTable,
    pub feature_keys: Vec<String>,
}

impl<'a> ExperimentInputs<'a> {
    pub fn new(
        features: &'a FeatureTable,
        ground_truth: &'a GroundTruth,
        intervals: &'a IntervalTable,
    ) -> Self {
        Self {
            features,
            ground_truth,
            intervals,
            feature_keys: DEFAULT_FEATURE_KEYS.iter().map(|key| key.to_string()).collect(),
        }
    }

    pub fn with_feature_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.feature_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Checks what every combination relies on: feature keys resolve and
    /// interval fields belong to the ground-truth universe.
    fn validate(&self) -> Result<(), TcdError> {
        self.features.column_indices(&self.feature_keys)?;
        self.ground_truth
            .ensure_known_fields(self.intervals.field_ids(), "interval table")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Windowed flags kept per result for inspection.
    pub sample_limit: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { sample_limit: 5 }
    }
}

/// A windowed flag rendered with text dates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleOutlier {
    pub field_id: FieldId,
    pub from_date: String,
    pub date: String,
}

impl From<&WindowedFlag> for SampleOutlier {
    fn from(flag: &WindowedFlag) -> Self {
        Self {
            field_id: flag.field_id(),
            from_date: flag.formatted_from_date(),
            date: flag.formatted_date(),
        }
    }
}

/// Scored outcome of one parameter combination.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Position of the combination in the run's input order.
    pub index: usize,
    pub parameters: ParameterCombination,
    pub score: Score,
    pub sample_outliers: Vec<SampleOutlier>,
    pub diagnostics: RunDiagnostics,
}

/// A combination that could not be scored. Kept out of the ranking.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CombinationFailure {
    pub index: usize,
    pub parameters: ParameterCombination,
    #[serde(serialize_with = "serialize_error")]
    pub error: TcdError,
}

fn serialize_error<S: Serializer>(error: &TcdError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ExperimentReport {
    /// Descending by F-score; ties keep input order.
    pub ranked: Vec<EvaluationResult>,
    pub failures: Vec<CombinationFailure>,
    pub elapsed: Duration,
}

impl ExperimentReport {
    pub fn best(&self) -> Option<&EvaluationResult> {
        self.ranked.first()
    }

    pub fn combinations_seen(&self) -> usize {
        self.ranked.len() + self.failures.len()
    }
}

enum Outcome {
    Scored(EvaluationResult),
    Failed(CombinationFailure),
}

/// Formats a duration as `HH:MM:SS`; hours are not wrapped.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn evaluate_combination<F: DetectorFactory>(
    inputs: &ExperimentInputs<'_>,
    factory: &F,
    combination: &ParameterCombination,
    index: usize,
    options: &RunOptions,
    ctx: &ExecutionContext<'_>,
    thread_count: Option<usize>,
) -> Result<EvaluationResult, TcdError> {
    let started = Instant::now();
    let detector = factory.build(combination)?;
    let aggregation = aggregate(inputs.features, &detector, &inputs.feature_keys, ctx)?;

    let (windowed, unwindowed) = inputs.intervals.attach(&aggregation.flags);
    if !unwindowed.is_empty() {
        tracing::debug!(dropped = unwindowed.len(), "flags without an interval window");
    }

    let counts = evaluate(&windowed, inputs.ground_truth)?;
    let score = score(counts);

    let mut diagnostics = RunDiagnostics {
        detector: Cow::Borrowed(detector.name()),
        seed: detector.seed(),
        repro_mode: ctx.repro_mode,
        runtime_ms: Some(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)),
        thread_count,
        aggregation: aggregation.diagnostics,
        flags_without_window: unwindowed.len(),
        ..RunDiagnostics::default()
    };
    let skipped = diagnostics.aggregation.skipped_count();
    if skipped > 0 {
        diagnostics.warnings.push(format!(
            "{skipped} date(s) skipped by detector preconditions"
        ));
    }
    if !unwindowed.is_empty() {
        diagnostics.notes.push(format!(
            "{} flag(s) had no interval window and were not evaluated",
            unwindowed.len()
        ));
    }

    tracing::debug!(
        f_score = score.f_score,
        precision = score.precision,
        recall = score.recall,
        "combination scored"
    );

    Ok(EvaluationResult {
        index,
        parameters: combination.clone(),
        score,
        sample_outliers: windowed
            .iter()
            .take(options.sample_limit)
            .map(SampleOutlier::from)
            .collect(),
        diagnostics,
    })
}

/// Fatal errors abort the run; the rest fail this combination only.
fn settle(
    index: usize,
    combination: &ParameterCombination,
    result: Result<EvaluationResult, TcdError>,
) -> Result<Outcome, TcdError> {
    match result {
        Ok(evaluated) => Ok(Outcome::Scored(evaluated)),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            tracing::warn!(index, parameters = %combination, error = %err, "combination failed");
            Ok(Outcome::Failed(CombinationFailure {
                index,
                parameters: combination.clone(),
                error: err,
            }))
        }
    }
}

fn run_sequential<F: DetectorFactory>(
    inputs: &ExperimentInputs<'_>,
    factory: &F,
    combinations: &[ParameterCombination],
    options: &RunOptions,
    ctx: &ExecutionContext<'_>,
) -> Result<Vec<Outcome>, TcdError> {
    let total = combinations.len();
    let mut outcomes = Vec::with_capacity(total);
    for (index, combination) in combinations.iter().enumerate() {
        ctx.check_cancelled()?;
        let span = tracing::info_span!("combination", index);
        let _entered = span.enter();

        let result = evaluate_combination(inputs, factory, combination, index, options, ctx, None);
        outcomes.push(settle(index, combination, result)?);
        ctx.report_progress((index + 1) as f32 / total as f32);
    }
    Ok(outcomes)
}

#[cfg(feature = "rayon")]
fn run_parallel<F: DetectorFactory>(
    inputs: &ExperimentInputs<'_>,
    factory: &F,
    combinations: &[ParameterCombination],
    options: &RunOptions,
    ctx: &ExecutionContext<'_>,
) -> Result<Vec<Outcome>, TcdError> {
    let total = combinations.len();
    let threads = Some(rayon::current_num_threads());
    let done = AtomicUsize::new(0);
    let results: Vec<Result<EvaluationResult, TcdError>> = combinations
        .par_iter()
        .enumerate()
        .map(|(index, combination)| {
            let span = tracing::info_span!("combination", index);
            let _entered = span.enter();
            let result =
                evaluate_combination(inputs, factory, combination, index, options, ctx, threads);
            let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
            ctx.report_progress(finished as f32 / total as f32);
            result
        })
        .collect();

    results
        .into_iter()
        .zip(combinations)
        .enumerate()
        .map(|(index, (result, combination))| settle(index, combination, result))
        .collect()
}

/// Scores every combination and ranks the results by descending F-score.
///
/// Cancellation is checked before each combination. Interval fields outside
/// the ground-truth universe abort the run before any detector is built.
pub fn run<F: DetectorFactory>(
    inputs: &ExperimentInputs<'_>,
    factory: &F,
    combinations: &[ParameterCombination],
    options: &RunOptions,
    ctx: &ExecutionContext<'_>,
) -> Result<ExperimentReport, TcdError> {
    let started = Instant::now();
    inputs.validate()?;
    tracing::info!(
        combinations = combinations.len(),
        dates = inputs.features.date_count(),
        repro_mode = ?ctx.repro_mode,
        "grid search started"
    );

    #[cfg(feature = "rayon")]
    let outcomes = if ctx.allows_parallel() {
        run_parallel(inputs, factory, combinations, options, ctx)?
    } else {
        run_sequential(inputs, factory, combinations, options, ctx)?
    };
    #[cfg(not(feature = "rayon"))]
    let outcomes = run_sequential(inputs, factory, combinations, options, ctx)?;

    let mut report = ExperimentReport::default();
    for outcome in outcomes {
        match outcome {
            Outcome::Scored(result) => report.ranked.push(result),
            Outcome::Failed(failure) => report.failures.push(failure),
        }
    }
    report
        .ranked
        .sort_by(|a, b| b.score.f_score.total_cmp(&a.score.f_score));
    report.elapsed = started.elapsed();

    tracing::info!(
        elapsed = %format_elapsed(report.elapsed),
        scored = report.ranked.len(),
        failed = report.failures.len(),
        best_f_score = report.best().map(|best| best.score.f_score),
        "grid search finished"
    );
    Ok(report)
}

/// Runs a validated [`ExperimentConfig`] with its own detector kind, feature
/// keys, options and reproducibility mode.
pub fn run_experiment(
    config: &ExperimentConfig,
    features: &FeatureTable,
    ground_truth: &GroundTruth,
    intervals: &IntervalTable,
    ctx: &ExecutionContext<'_>,
) -> Result<ExperimentReport, TcdError> {
    config.validate()?;
    let combinations = config.combinations()?;
    let inputs = ExperimentInputs::new(features, ground_truth, intervals)
        .with_feature_keys(config.feature_keys.iter().cloned());
    let ctx = ctx.with_repro_mode(config.repro_mode);
    run(
        &inputs,
        &config.detector,
        &combinations,
        &config.run_options(),
        &ctx,
    )
}
