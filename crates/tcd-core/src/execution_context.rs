// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::TcdError;
use crate::control::CancelToken;
use crate::observability::ProgressSink;
use crate::repro::ReproMode;

/// Execution controls threaded through aggregation and grid runs.
#[derive(Clone, Copy)]
pub struct ExecutionContext<'a> {
    pub cancel: Option<&'a CancelToken>,
    pub repro_mode: ReproMode,
    pub progress: Option<&'a dyn ProgressSink>,
}

impl Default for ExecutionContext<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> ExecutionContext<'a> {
    /// Creates a context with safe defaults and no optional hooks.
    pub fn new() -> Self {
        Self {
            cancel: None,
            repro_mode: ReproMode::Balanced,
            progress: None,
        }
    }

    pub fn with_cancel(mut self, cancel: &'a CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_repro_mode(mut self, repro_mode: ReproMode) -> Self {
        self.repro_mode = repro_mode;
        self
    }

    pub fn with_progress_sink(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(CancelToken::is_cancelled)
    }

    /// Returns a cancelled error when cancellation has been requested.
    pub fn check_cancelled(&self) -> Result<(), TcdError> {
        if self.is_cancelled() {
            return Err(TcdError::cancelled());
        }
        Ok(())
    }

    /// Parallel loops are only allowed when ordering cannot be observed
    /// mid-run: no strict reproducibility and no cancellation polling.
    pub fn allows_parallel(&self) -> bool {
        self.repro_mode.permits_parallel() && self.cancel.is_none()
    }

    /// Emits clamped progress to the sink, if configured.
    pub fn report_progress(&self, fraction: f32) {
        if !fraction.is_finite() {
            return;
        }

        if let Some(sink) = self.progress {
            sink.on_progress(fraction.clamp(0.0, 1.0));
        }
    }
}

impl std::fmt::Debug for ExecutionContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("cancel", &self.cancel)
            .field("repro_mode", &self.repro_mode)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::ExecutionContext;
    use crate::control::CancelToken;
    use crate::observability::ProgressSink;
    use crate::repro::ReproMode;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockProgressSink {
        values: Mutex<Vec<f32>>,
    }

    impl ProgressSink for MockProgressSink {
        fn on_progress(&self, fraction: f32) {
            self.values
                .lock()
                .expect("progress mutex should lock")
                .push(fraction);
        }
    }

    #[test]
    fn new_context_has_no_hooks_and_balanced_mode() {
        let ctx = ExecutionContext::new();
        assert!(ctx.cancel.is_none());
        assert!(ctx.progress.is_none());
        assert_eq!(ctx.repro_mode, ReproMode::Balanced);
        assert!(ctx.allows_parallel());
    }

    #[test]
    fn check_cancelled_returns_cancelled_error_once_token_fires() {
        let cancel = CancelToken::new();
        let ctx = ExecutionContext::new().with_cancel(&cancel);

        assert!(ctx.check_cancelled().is_ok());
        cancel.cancel();

        let err = ctx
            .check_cancelled()
            .expect_err("cancelled token should return an error");
        assert_eq!(err.to_string(), "cancelled");
    }

    #[test]
    fn strict_mode_or_cancel_token_disables_parallelism() {
        let strict = ExecutionContext::new().with_repro_mode(ReproMode::Strict);
        assert!(!strict.allows_parallel());

        let cancel = CancelToken::new();
        let cancellable = ExecutionContext::new().with_cancel(&cancel);
        assert!(!cancellable.allows_parallel());
    }

    #[test]
    fn report_progress_clamps_and_ignores_non_finite_values() {
        let progress = MockProgressSink::default();
        let ctx = ExecutionContext::new().with_progress_sink(&progress);

        ctx.report_progress(-0.2);
        ctx.report_progress(0.25);
        ctx.report_progress(1.2);
        ctx.report_progress(f32::NAN);
        ctx.report_progress(f32::INFINITY);

        let got = progress
            .values
            .lock()
            .expect("progress values should lock")
            .clone();
        assert_eq!(got, vec![0.0, 0.25, 1.0]);
    }

    #[test]
    fn report_progress_is_noop_without_sink() {
        let ctx = ExecutionContext::new();
        ctx.report_progress(0.5);
    }
}
