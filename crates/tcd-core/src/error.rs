// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use thiserror::Error;

/// Canonical error type shared by every tcd crate.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TcdError {
    /// The sample handed to a detector is too small or malformed for it.
    #[error("detector precondition failed: {0}")]
    DetectorPrecondition(String),

    /// A hyperparameter or feature key is unknown or out of range.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Upstream tables break the preprocessing contract.
    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("numerical issue: {0}")]
    NumericalIssue(String),

    #[error("cancelled")]
    Cancelled,
}

impl TcdError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::DetectorPrecondition(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn data_integrity(msg: impl Into<String>) -> Self {
        Self::DataIntegrity(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn numerical_issue(msg: impl Into<String>) -> Self {
        Self::NumericalIssue(msg.into())
    }

    pub fn cancelled() -> Self {
        Self::Cancelled
    }

    /// Returns true for errors that must abort a whole experiment run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DataIntegrity(_) | Self::Cancelled)
    }

    /// Returns true for errors that only disqualify the current date.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::DetectorPrecondition(_))
    }
}

#[cfg(test)]
mod tests {
    use super::TcdError;

    #[test]
    fn display_messages_carry_category_prefix() {
        assert_eq!(
            TcdError::precondition("need more than 3 rows, got 2").to_string(),
            "detector precondition failed: need more than 3 rows, got 2"
        );
        assert_eq!(
            TcdError::configuration("unknown key 'epsilon'").to_string(),
            "invalid configuration: unknown key 'epsilon'"
        );
        assert_eq!(
            TcdError::data_integrity("from_date after date").to_string(),
            "data integrity violation: from_date after date"
        );
        assert_eq!(TcdError::cancelled().to_string(), "cancelled");
    }

    #[test]
    fn only_integrity_and_cancellation_are_fatal() {
        assert!(TcdError::data_integrity("x").is_fatal());
        assert!(TcdError::cancelled().is_fatal());
        assert!(!TcdError::precondition("x").is_fatal());
        assert!(!TcdError::configuration("x").is_fatal());
        assert!(!TcdError::invalid_input("x").is_fatal());
        assert!(!TcdError::numerical_issue("x").is_fatal());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TcdError>();
    }
}
