// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use chrono::NaiveDate;
use std::collections::BTreeMap;
use tcd_core::{FieldId, GroundTruth, TcdError, WindowedFlag};

/// Confusion counts from matching flags against ground-truth events.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MatchCounts {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

/// A ground-truth event no flag window covers.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MissedEvent {
    pub field_id: FieldId,
    pub date: NaiveDate,
}

/// Full outcome of a matching pass.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchReport {
    pub counts: MatchCounts,
    /// Index-aligned with the input flags; `true` when the flag covers at
    /// least one event of its field.
    pub matched: Vec<bool>,
    /// False negatives, by field then date.
    pub missed: Vec<MissedEvent>,
}

/// Matches windowed flags against ground-truth events field by field.
///
/// An event is a true positive when at least one flag of its field covers it
/// (`from_date <= event <= date`); every covering flag is marked matched and
/// stays available for further events. Events nothing covers are false
/// negatives. Flags that never matched are false positives.
///
/// Flags on fields outside the ground-truth universe are a data-integrity
/// error.
pub fn match_events(flags: &[WindowedFlag], truth: &GroundTruth) -> Result<MatchReport, TcdError> {
    truth.ensure_known_fields(flags.iter().map(WindowedFlag::field_id), "outlier flags")?;

    let mut by_field: BTreeMap<FieldId, Vec<usize>> = BTreeMap::new();
    for (idx, flag) in flags.iter().enumerate() {
        by_field.entry(flag.field_id()).or_default().push(idx);
    }

    let mut report = MatchReport {
        matched: vec![false; flags.len()],
        ..MatchReport::default()
    };
    let no_flags: Vec<usize> = Vec::new();
    let mut false_positives = 0usize;

    for &field_id in truth.universe() {
        let field_flags = by_field.get(&field_id).unwrap_or(&no_flags);
        for &event in truth.events(field_id) {
            let mut covered = false;
            for &idx in field_flags {
                if flags[idx].covers(event) {
                    report.matched[idx] = true;
                    covered = true;
                }
            }
            if covered {
                report.counts.true_positives += 1;
            } else {
                report.counts.false_negatives += 1;
                report.missed.push(MissedEvent {
                    field_id,
                    date: event,
                });
            }
        }
        false_positives += field_flags.iter().filter(|&&idx| !report.matched[idx]).count();
    }
    report.counts.false_positives = false_positives;

    tracing::debug!(
        flags = flags.len(),
        events = truth.event_count(),
        true_positives = report.counts.true_positives,
        false_positives = report.counts.false_positives,
        false_negatives = report.counts.false_negatives,
        "matched flags against ground truth"
    );
    Ok(report)
}

/// Confusion counts only; see [`match_events`].
pub fn evaluate(flags: &[WindowedFlag], truth: &GroundTruth) -> Result<MatchCounts, TcdError> {
    Ok(match_events(flags, truth)?.counts)
}
