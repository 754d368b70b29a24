// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

pub mod matcher;
pub mod score;

pub use matcher::{MatchCounts, MatchReport, MissedEvent, evaluate, match_events};
pub use score::{Score, score};

/// Evaluation of windowed outlier flags for tcd-rs.
pub fn crate_name() -> &'static str {
    "tcd-eval"
}
