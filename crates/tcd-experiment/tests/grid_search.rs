// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use chrono::NaiveDate;
use std::sync::Mutex;
use tcd_core::{
    CancelToken, ExecutionContext, FeatureTable, GroundTruth, IntervalTable, ProgressSink,
    ReproMode, SampleMatrix, TcdError,
};
use tcd_detect::{DetectorFactory, DetectorKind, OutlierDetector, ParamValue, ParameterCombination};
use tcd_experiment::{
    ExperimentConfig, ExperimentInputs, ParameterGrid, RunOptions, run, run_experiment,
};

fn date(m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, m, d).expect("valid test date")
}

/// Flags every row whose first feature equals one of the listed values.
struct ListedValues {
    values: Vec<f64>,
}

impl OutlierDetector for ListedValues {
    fn name(&self) -> &'static str {
        "listed"
    }

    fn detect(&self, sample: &SampleMatrix) -> Result<Vec<bool>, TcdError> {
        Ok(sample
            .iter_rows()
            .map(|row| self.values.contains(&row[0]))
            .collect())
    }
}

struct ListedFactory;

impl DetectorFactory for ListedFactory {
    type Detector = ListedValues;

    fn build(&self, combination: &ParameterCombination) -> Result<ListedValues, TcdError> {
        match combination.get("fields") {
            Some(ParamValue::Text(list)) => list
                .split(',')
                .map(|item| {
                    item.trim().parse::<f64>().map_err(|err| {
                        TcdError::configuration(format!("bad field '{item}': {err}"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()
                .map(|values| ListedValues { values }),
            other => Err(TcdError::configuration(format!(
                "listed.fields must be text, got {other:?}"
            ))),
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    values: Mutex<Vec<f32>>,
}

impl ProgressSink for RecordingSink {
    fn on_progress(&self, fraction: f32) {
        self.values
            .lock()
            .expect("progress mutex should lock")
            .push(fraction);
    }
}

struct Fixture {
    features: FeatureTable,
    truth: GroundTruth,
    intervals: IntervalTable,
}

/// Five fields observed on 2020-03-01 and 2020-03-11, each carrying its own
/// id as its only feature. Tillage on field 0 (03-05) and field 1 (03-11).
fn fixture() -> Fixture {
    let mut features = FeatureTable::new(["VV_ratio"]).expect("columns should be valid");
    for day in [date(3, 1), date(3, 11)] {
        for field_id in 0..5u32 {
            features
                .insert(day, field_id, vec![f64::from(field_id)])
                .expect("observation should insert");
        }
    }
    let truth = GroundTruth::with_field_range(5)
        .with_event(0, date(3, 5))
        .and_then(|truth| truth.with_event(1, date(3, 11)))
        .expect("events should insert");
    let intervals =
        IntervalTable::from_observation_dates(&features).expect("intervals should derive");
    Fixture {
        features,
        truth,
        intervals,
    }
}

fn listed(fields: &str) -> ParameterCombination {
    ParameterCombination::new().with("fields", fields)
}

#[test]
fn results_are_ranked_by_descending_f_score() {
    let fx = fixture();
    let inputs = ExperimentInputs::new(&fx.features, &fx.truth, &fx.intervals)
        .with_feature_keys(["VV_ratio"]);
    // tp=1 fp=1 fn=1 -> 0.5, then tp=2 fp=1 fn=0 -> 0.8
    let combinations = vec![listed("0,3"), listed("0,1,2")];

    let report = run(
        &inputs,
        &ListedFactory,
        &combinations,
        &RunOptions::default(),
        &ExecutionContext::new(),
    )
    .expect("run should succeed");

    assert!(report.failures.is_empty());
    let f_scores: Vec<f64> = report.ranked.iter().map(|r| r.score.f_score).collect();
    assert!((f_scores[0] - 0.8).abs() < 1e-12, "got {f_scores:?}");
    assert!((f_scores[1] - 0.5).abs() < 1e-12, "got {f_scores:?}");
    assert_eq!(report.ranked[0].index, 1);
    assert_eq!(report.ranked[0].parameters, listed("0,1,2"));

    let best = report.best().expect("best result should exist");
    assert_eq!(
        (
            best.score.true_positives,
            best.score.false_positives,
            best.score.false_negatives
        ),
        (2, 1, 0)
    );
    // The first observation of each field has no window.
    assert_eq!(best.diagnostics.flags_without_window, 3);
    assert_eq!(best.diagnostics.detector, "listed");
    assert!(best.diagnostics.runtime_ms.is_some());
    assert_eq!(best.sample_outliers.len(), 3);
    assert_eq!(best.sample_outliers[0].from_date, "2020-03-02");
    assert_eq!(best.sample_outliers[0].date, "2020-03-11");
}

#[test]
fn ties_keep_input_order_and_sample_limit_applies() {
    let fx = fixture();
    let inputs = ExperimentInputs::new(&fx.features, &fx.truth, &fx.intervals)
        .with_feature_keys(["VV_ratio"]);
    let combinations = vec![listed("0,3"), listed("0,1,2"), listed("2, 1, 0")];

    let report = run(
        &inputs,
        &ListedFactory,
        &combinations,
        &RunOptions { sample_limit: 1 },
        &ExecutionContext::new().with_repro_mode(ReproMode::Strict),
    )
    .expect("run should succeed");

    let order: Vec<usize> = report.ranked.iter().map(|r| r.index).collect();
    assert_eq!(order, vec![1, 2, 0]);
    assert!(report.ranked.iter().all(|r| r.sample_outliers.len() == 1));
}

#[test]
fn configuration_failures_are_kept_outside_the_ranking() {
    let fx = fixture();
    let inputs = ExperimentInputs::new(&fx.features, &fx.truth, &fx.intervals)
        .with_feature_keys(["VV_ratio"]);
    let combinations = vec![
        listed("0,1,2"),
        ParameterCombination::new().with("fields", 3),
        listed("0,3"),
    ];
    let sink = RecordingSink::default();

    let report = run(
        &inputs,
        &ListedFactory,
        &combinations,
        &RunOptions::default(),
        &ExecutionContext::new().with_progress_sink(&sink),
    )
    .expect("configuration errors should not abort the run");

    assert_eq!(report.ranked.len(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 1);
    assert!(matches!(report.failures[0].error, TcdError::Configuration(_)));
    assert_eq!(report.combinations_seen(), 3);

    let progress = sink.values.lock().expect("progress should lock").clone();
    assert_eq!(progress.len(), 3);
    assert!(progress.iter().any(|&fraction| fraction == 1.0));
}

#[test]
fn cancelled_run_returns_cancelled() {
    let fx = fixture();
    let inputs = ExperimentInputs::new(&fx.features, &fx.truth, &fx.intervals)
        .with_feature_keys(["VV_ratio"]);
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = run(
        &inputs,
        &ListedFactory,
        &[listed("0")],
        &RunOptions::default(),
        &ExecutionContext::new().with_cancel(&cancel),
    )
    .expect_err("cancelled run should fail");
    assert_eq!(err, TcdError::Cancelled);
}

#[test]
fn interval_field_outside_universe_aborts_the_run() {
    let fx = fixture();
    let intervals = IntervalTable::from_observation_dates(&fx.features)
        .and_then(|table| table.with_window(7, date(3, 11), date(3, 2)))
        .expect("intervals should build");
    let inputs =
        ExperimentInputs::new(&fx.features, &fx.truth, &intervals).with_feature_keys(["VV_ratio"]);

    let err = run(
        &inputs,
        &ListedFactory,
        &[listed("0,1,2")],
        &RunOptions::default(),
        &ExecutionContext::new(),
    )
    .expect_err("broken interval table should abort");
    assert!(matches!(err, TcdError::DataIntegrity(_)));
    assert!(err.is_fatal());
}

#[test]
fn unknown_feature_key_fails_before_any_combination() {
    let fx = fixture();
    let inputs = ExperimentInputs::new(&fx.features, &fx.truth, &fx.intervals);

    let err = run(
        &inputs,
        &ListedFactory,
        &[listed("0")],
        &RunOptions::default(),
        &ExecutionContext::new(),
    )
    .expect_err("default keys are not in this table");
    assert!(matches!(err, TcdError::Configuration(_)));
}

/// Twelve fields over four dates; only field 3 departs from the pack, on the
/// last date, where the tillage event sits.
fn density_fixture() -> Fixture {
    let keys = ["VV_ratio", "VH_ratio", "VH_VV_ratio_diff"];
    let mut features = FeatureTable::new(keys).expect("columns should be valid");
    let days = [date(4, 1), date(4, 13), date(4, 25), date(5, 7)];
    for (pos, &day) in days.iter().enumerate() {
        for field_id in 0..12u32 {
            let shifted = pos == days.len() - 1 && field_id == 3;
            let value = if shifted { 10.0 } else { 0.0 };
            features
                .insert(day, field_id, vec![value, value, -value])
                .expect("observation should insert");
        }
    }
    let truth = GroundTruth::with_field_range(12)
        .with_event(3, date(5, 1))
        .expect("event should insert");
    let intervals =
        IntervalTable::from_observation_dates(&features).expect("intervals should derive");
    Fixture {
        features,
        truth,
        intervals,
    }
}

#[test]
fn density_experiment_runs_end_to_end_from_config() {
    let fx = density_fixture();
    let config = ExperimentConfig::new(DetectorKind::Density).with_combinations(vec![
        ParameterCombination::new()
            .with("eps", 0.5)
            .with("min_samples", 13),
        ParameterCombination::new()
            .with("eps", 0.5)
            .with("min_samples", 5),
    ]);

    let report = run_experiment(
        &config,
        &fx.features,
        &fx.truth,
        &fx.intervals,
        &ExecutionContext::new(),
    )
    .expect("experiment should run");

    assert!(report.failures.is_empty());
    let best = report.best().expect("best result should exist");
    assert_eq!(best.index, 1);
    assert_eq!(best.score.f_score, 1.0);
    assert_eq!(best.diagnostics.detector, "dbscan");
    assert_eq!(best.sample_outliers.len(), 1);
    assert_eq!(best.sample_outliers[0].field_id, 3);
    assert_eq!(best.sample_outliers[0].from_date, "2020-04-26");

    // min_samples above the field count refuses every date.
    let refused = &report.ranked[1];
    assert_eq!(refused.score.f_score, 0.0);
    assert_eq!(refused.score.false_negatives, 1);
    assert_eq!(refused.diagnostics.aggregation.skipped_count(), 4);
    assert_eq!(refused.diagnostics.warnings.len(), 1);
}

#[test]
fn unknown_hyperparameter_fails_only_its_combination() {
    let fx = density_fixture();
    let config = ExperimentConfig::new(DetectorKind::Density).with_combinations(vec![
        ParameterCombination::new().with("eps", 0.5),
        ParameterCombination::new().with("n_estimators", 100),
    ]);

    let report = run_experiment(
        &config,
        &fx.features,
        &fx.truth,
        &fx.intervals,
        &ExecutionContext::new(),
    )
    .expect("experiment should run");

    assert_eq!(report.ranked.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 1);
    assert!(matches!(report.failures[0].error, TcdError::Configuration(_)));
}

#[test]
fn report_serializes_to_json() {
    let fx = fixture();
    let inputs = ExperimentInputs::new(&fx.features, &fx.truth, &fx.intervals)
        .with_feature_keys(["VV_ratio"]);
    let report = run(
        &inputs,
        &ListedFactory,
        &[listed("0,1,2"), ParameterCombination::new()],
        &RunOptions::default(),
        &ExecutionContext::new(),
    )
    .expect("run should succeed");

    let encoded = serde_json::to_value(&report).expect("report should serialize");
    assert_eq!(encoded["ranked"][0]["parameters"]["fields"], "0,1,2");
    assert_eq!(encoded["ranked"][0]["sample_outliers"][0]["date"], "2020-03-11");
    assert!(
        encoded["failures"][0]["error"]
            .as_str()
            .is_some_and(|message| message.starts_with("invalid configuration"))
    );
}

/// Wraps [`ListedFactory`] and records the combinations it builds, in call
/// order.
#[derive(Default)]
struct BuildOrder {
    built: Mutex<Vec<String>>,
}

impl DetectorFactory for BuildOrder {
    type Detector = ListedValues;

    fn build(&self, combination: &ParameterCombination) -> Result<ListedValues, TcdError> {
        self.built
            .lock()
            .expect("build order should lock")
            .push(combination.to_string());
        ListedFactory.build(combination)
    }
}

#[test]
fn cancel_token_keeps_combinations_sequential() {
    let fx = fixture();
    let inputs = ExperimentInputs::new(&fx.features, &fx.truth, &fx.intervals)
        .with_feature_keys(["VV_ratio"]);
    let combinations: Vec<ParameterCombination> = ["0", "0,1", "0,1,2", "3", "1,3", "4", "2,4"]
        .into_iter()
        .map(listed)
        .collect();
    let cancel = CancelToken::new();
    let factory = BuildOrder::default();

    let report = run(
        &inputs,
        &factory,
        &combinations,
        &RunOptions::default(),
        &ExecutionContext::new().with_cancel(&cancel),
    )
    .expect("run should succeed");

    let built = factory.built.lock().expect("build order should lock").clone();
    let expected: Vec<String> = combinations.iter().map(ToString::to_string).collect();
    assert_eq!(built, expected);
    assert!(
        report
            .ranked
            .iter()
            .all(|result| result.diagnostics.thread_count.is_none()
                && result.diagnostics.aggregation.thread_count.is_none())
    );
}

fn density_grid_config(repro_mode: ReproMode) -> ExperimentConfig {
    let mut config = ExperimentConfig::new(DetectorKind::Density).with_grid(
        ParameterGrid::new()
            .with_axis("eps", [0.25, 0.5, 1.0, 2.0])
            .with_axis("min_samples", [2, 5, 13]),
    );
    config.repro_mode = repro_mode;
    config
}

#[cfg(feature = "rayon")]
#[test]
fn parallel_grid_ranks_like_strict_grid() {
    let fx = density_fixture();
    let run_with = |mode: ReproMode| {
        run_experiment(
            &density_grid_config(mode),
            &fx.features,
            &fx.truth,
            &fx.intervals,
            &ExecutionContext::new(),
        )
        .expect("experiment should run")
    };
    let strict = run_with(ReproMode::Strict);
    let parallel = run_with(ReproMode::Balanced);

    let ranking = |report: &tcd_experiment::ExperimentReport| -> Vec<(usize, f64)> {
        report
            .ranked
            .iter()
            .map(|result| (result.index, result.score.f_score))
            .collect()
    };
    assert_eq!(strict.ranked.len(), 12);
    assert_eq!(ranking(&parallel), ranking(&strict));
    for (fast, reference) in parallel.ranked.iter().zip(&strict.ranked) {
        assert_eq!(fast.sample_outliers, reference.sample_outliers);
        assert_eq!(fast.score, reference.score);
        assert_eq!(
            fast.diagnostics.aggregation.flags_emitted,
            reference.diagnostics.aggregation.flags_emitted
        );
        assert!(fast.diagnostics.thread_count.is_some());
        assert!(reference.diagnostics.thread_count.is_none());
        assert!(reference.diagnostics.aggregation.thread_count.is_none());
    }
}

#[cfg(feature = "rayon")]
#[test]
fn cancel_token_disables_parallel_thread_count() {
    let fx = density_fixture();
    let cancel = CancelToken::new();
    let report = run_experiment(
        &density_grid_config(ReproMode::Balanced),
        &fx.features,
        &fx.truth,
        &fx.intervals,
        &ExecutionContext::new().with_cancel(&cancel),
    )
    .expect("experiment should run");

    assert_eq!(report.ranked.len(), 12);
    assert!(report.ranked.iter().all(|result| {
        result.diagnostics.thread_count.is_none()
            && result.diagnostics.aggregation.thread_count.is_none()
    }));
}
