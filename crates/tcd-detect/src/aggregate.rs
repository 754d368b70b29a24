// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::detector::OutlierDetector;
use chrono::NaiveDate;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tcd_core::{
    AggregationDiagnostics, ExecutionContext, FeatureTable, OutlierFlag, SkippedDate, TcdError,
};

/// Outlier flags of every date plus what happened along the way.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Aggregation {
    pub flags: Vec<OutlierFlag>,
    pub diagnostics: AggregationDiagnostics,
}

enum DateOutcome {
    Flagged(Vec<OutlierFlag>),
    Skipped(SkippedDate),
}

fn detect_date<D: OutlierDetector + ?Sized>(
    table: &FeatureTable,
    detector: &D,
    columns: &[usize],
    date: NaiveDate,
) -> Result<DateOutcome, TcdError> {
    let sample = table.sample(date, columns)?;
    let mask = match detector.detect(&sample.matrix) {
        Ok(mask) => mask,
        Err(err) if err.is_precondition() => {
            tracing::warn!(
                detector = detector.name(),
                %date,
                rows = sample.field_ids.len(),
                error = %err,
                "skipping date"
            );
            return Ok(DateOutcome::Skipped(SkippedDate {
                date,
                reason: err.to_string(),
            }));
        }
        Err(err) => return Err(err),
    };

    if mask.len() != sample.field_ids.len() {
        return Err(TcdError::invalid_input(format!(
            "{} returned {} mask entries for {} rows on {date}",
            detector.name(),
            mask.len(),
            sample.field_ids.len()
        )));
    }

    let flags: Vec<OutlierFlag> = sample
        .field_ids
        .iter()
        .zip(&mask)
        .filter(|(_, flagged)| **flagged)
        .map(|(field_id, _)| OutlierFlag {
            field_id: *field_id,
            date,
        })
        .collect();
    tracing::debug!(
        detector = detector.name(),
        %date,
        rows = mask.len(),
        flagged = flags.len(),
        "date processed"
    );
    Ok(DateOutcome::Flagged(flags))
}

/// Runs `detector` on every date of `table`, ascending, and concatenates the
/// flags. Each flag carries the field id of the flagged row.
///
/// Dates whose sample the detector refuses with a precondition error are
/// skipped and recorded in the diagnostics; any other error aborts.
pub fn aggregate<D, S>(
    table: &FeatureTable,
    detector: &D,
    feature_keys: &[S],
    ctx: &ExecutionContext<'_>,
) -> Result<Aggregation, TcdError>
where
    D: OutlierDetector + ?Sized,
    S: AsRef<str>,
{
    let columns = table.column_indices(feature_keys)?;
    let dates: Vec<NaiveDate> = table.dates().collect();

    #[cfg(feature = "rayon")]
    let (outcomes, thread_count): (Vec<DateOutcome>, Option<usize>) = if ctx.allows_parallel() {
        let outcomes = dates
            .par_iter()
            .map(|&date| detect_date(table, detector, &columns, date))
            .collect::<Result<Vec<_>, TcdError>>()?;
        (outcomes, Some(rayon::current_num_threads()))
    } else {
        let outcomes = dates
            .iter()
            .map(|&date| detect_date(table, detector, &columns, date))
            .collect::<Result<Vec<_>, TcdError>>()?;
        (outcomes, None)
    };

    #[cfg(not(feature = "rayon"))]
    let (outcomes, thread_count): (Vec<DateOutcome>, Option<usize>) = {
        let _ = ctx;
        let outcomes = dates
            .iter()
            .map(|&date| detect_date(table, detector, &columns, date))
            .collect::<Result<Vec<_>, TcdError>>()?;
        (outcomes, None)
    };

    let mut aggregation = Aggregation::default();
    aggregation.diagnostics.thread_count = thread_count;
    for outcome in outcomes {
        match outcome {
            DateOutcome::Flagged(flags) => {
                aggregation.diagnostics.dates_processed += 1;
                aggregation.diagnostics.flags_emitted += flags.len();
                aggregation.flags.extend(flags);
            }
            DateOutcome::Skipped(skipped) => aggregation.diagnostics.dates_skipped.push(skipped),
        }
    }
    Ok(aggregation)
}
