// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

/// Receives fractional progress updates in `[0, 1]`.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, fraction: f32);
}
