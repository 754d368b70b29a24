// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::matcher::MatchCounts;

/// Confusion counts with precision, recall and F-score.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Score {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub precision: f64,
    pub recall: f64,
    pub f_score: f64,
}

impl Score {
    pub fn counts(&self) -> MatchCounts {
        MatchCounts {
            true_positives: self.true_positives,
            false_positives: self.false_positives,
            false_negatives: self.false_negatives,
        }
    }
}

impl From<MatchCounts> for Score {
    fn from(counts: MatchCounts) -> Self {
        score(counts)
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn reciprocal_or_zero(value: f64) -> f64 {
    if value > 0.0 { 1.0 / value } else { 0.0 }
}

/// Scores confusion counts.
///
/// Zero denominators yield 0. The F-score is `2 / (1/precision + 1/recall)`
/// where a zero precision or recall contributes a zero reciprocal. Precision
/// and recall share `tp`, so either both are 0 or neither is, and the score
/// is 0 exactly when they are.
pub fn score(counts: MatchCounts) -> Score {
    let MatchCounts {
        true_positives: tp,
        false_positives: fp,
        false_negatives: fn_,
    } = counts;
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);

    let a = reciprocal_or_zero(precision);
    let b = reciprocal_or_zero(recall);
    let f_score = if a + b > 0.0 { 2.0 / (a + b) } else { 0.0 };

    Score {
        true_positives: tp,
        false_positives: fp,
        false_negatives: fn_,
        precision,
        recall,
        f_score,
    }
}

#[cfg(test)]
mod tests {
    use super::score;
    use crate::matcher::MatchCounts;

    fn counts(tp: usize, fp: usize, fn_: usize) -> MatchCounts {
        MatchCounts {
            true_positives: tp,
            false_positives: fp,
            false_negatives: fn_,
        }
    }

    fn assert_approx_eq(actual: f64, expected: f64) {
        let delta = (actual - expected).abs();
        assert!(
            delta <= 1e-12,
            "expected {expected}, got {actual} (delta={delta})"
        );
    }

    #[test]
    fn perfect_match_scores_one() {
        let s = score(counts(1, 0, 0));
        assert_eq!(s.precision, 1.0);
        assert_eq!(s.recall, 1.0);
        assert_eq!(s.f_score, 1.0);
    }

    #[test]
    fn all_zero_counts_score_zero() {
        let s = score(counts(0, 0, 0));
        assert_eq!((s.precision, s.recall, s.f_score), (0.0, 0.0, 0.0));
    }

    #[test]
    fn missed_event_only_scores_zero() {
        let s = score(counts(0, 0, 1));
        assert_eq!((s.precision, s.recall, s.f_score), (0.0, 0.0, 0.0));
        assert_eq!(s.false_negatives, 1);
    }

    #[test]
    fn false_positives_only_score_zero() {
        let s = score(counts(0, 4, 0));
        assert_eq!((s.precision, s.recall, s.f_score), (0.0, 0.0, 0.0));
    }

    #[test]
    fn mixed_counts_follow_harmonic_mean() {
        let s = score(counts(2, 2, 1));
        assert_approx_eq(s.precision, 0.5);
        assert_approx_eq(s.recall, 2.0 / 3.0);
        assert_approx_eq(s.f_score, 4.0 / 7.0);
        assert_eq!(s.counts(), counts(2, 2, 1));
    }
}
