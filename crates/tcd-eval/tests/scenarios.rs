// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use chrono::NaiveDate;
use tcd_core::{GroundTruth, IntervalTable, OutlierFlag, WindowedFlag};
use tcd_eval::{evaluate, score};

fn date(m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, m, d).expect("valid test date")
}

fn truth_with_one_event() -> GroundTruth {
    GroundTruth::with_field_range(5)
        .with_event(0, date(3, 10))
        .expect("event should insert")
}

#[test]
fn single_covering_flag_scores_perfectly() {
    let flags = [WindowedFlag::new(0, date(3, 5), date(3, 12)).expect("window should be valid")];
    let s = score(evaluate(&flags, &truth_with_one_event()).expect("evaluation should succeed"));

    assert_eq!(
        (s.true_positives, s.false_positives, s.false_negatives),
        (1, 0, 0)
    );
    assert_eq!((s.precision, s.recall, s.f_score), (1.0, 1.0, 1.0));
}

#[test]
fn no_flags_scores_zero() {
    let s = score(evaluate(&[], &truth_with_one_event()).expect("evaluation should succeed"));

    assert_eq!(
        (s.true_positives, s.false_positives, s.false_negatives),
        (0, 0, 1)
    );
    assert_eq!((s.precision, s.recall, s.f_score), (0.0, 0.0, 0.0));
}

#[test]
fn attached_windows_feed_the_evaluator() {
    let intervals = IntervalTable::new()
        .with_window(0, date(3, 12), date(3, 5))
        .and_then(|t| t.with_window(1, date(3, 12), date(3, 5)))
        .expect("windows should insert");
    let raw = [
        OutlierFlag {
            field_id: 0,
            date: date(3, 12),
        },
        OutlierFlag {
            field_id: 1,
            date: date(3, 12),
        },
        OutlierFlag {
            field_id: 1,
            date: date(3, 30),
        },
    ];

    let (windowed, dropped) = intervals.attach(&raw);
    assert_eq!(dropped.len(), 1);

    let s = score(evaluate(&windowed, &truth_with_one_event()).expect("evaluation should succeed"));
    assert_eq!(
        (s.true_positives, s.false_positives, s.false_negatives),
        (1, 1, 0)
    );
    assert!((s.f_score - 2.0 / 3.0).abs() < 1e-12);
}
