// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

/// Whether per-date and per-combination work may fan out across threads.
///
/// Results are identical in both modes; `Strict` only pins the execution
/// order.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReproMode {
    /// Every loop runs sequentially, even with the `rayon` feature on.
    Strict,
    /// Dates and combinations run on the rayon pool when it is available.
    #[default]
    Balanced,
}

impl ReproMode {
    pub fn permits_parallel(self) -> bool {
        matches!(self, Self::Balanced)
    }
}
