//! Error types for the form engine
//!
//! Only conditions that make an operation impossible are errors. Validation
//! failures live in the [`ErrorTree`](crate::ErrorTree), unknown paths are
//! ignored with a diagnostic, and re-entrant submits are reported through
//! [`SubmitOutcome::Rejected`](crate::SubmitOutcome).

use formwork_common::{ErrorSeverity, Severity};
use thiserror::Error;

/// Result type for form operations
pub type Result<T> = std::result::Result<T, FormError>;

/// Why a session is not usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitializationError {
    /// Defaults have not been resolved yet
    #[error("form defaults have not been resolved yet")]
    Pending,

    /// The defaults resolver failed; the session is terminal
    #[error("form defaults failed to resolve: {message}")]
    Failed { message: String },

    /// Resolution was already started for this session
    #[error("form defaults were already resolved for this session")]
    AlreadyStarted,
}

/// Errors that can occur in form operations
#[derive(Debug, Error)]
pub enum FormError {
    /// The session is not ready, or failed to initialize
    #[error(transparent)]
    Initialization(#[from] InitializationError),

    /// A pattern rule was given an invalid regular expression
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Options could not be extracted from configuration sources
    #[error("invalid form options: {source}")]
    Config {
        #[from]
        source: figment::Error,
    },
}

impl FormError {
    /// True if the error came from a failed or unfinished initialization.
    pub fn is_initialization(&self) -> bool {
        matches!(self, FormError::Initialization(_))
    }
}

impl Severity for FormError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            FormError::Initialization(InitializationError::Failed { .. }) => {
                ErrorSeverity::Critical
            }
            FormError::Initialization(InitializationError::Pending) => ErrorSeverity::Error,
            FormError::Initialization(InitializationError::AlreadyStarted) => {
                ErrorSeverity::Warning
            }
            FormError::InvalidPattern { .. } => ErrorSeverity::Error,
            FormError::Config { .. } => ErrorSeverity::Error,
        }
    }
}

/// Error returned by [`Form::submit`](crate::Form::submit).
#[derive(Debug, Error)]
pub enum SubmitError<E> {
    /// The engine refused the submission (e.g. session not ready)
    #[error(transparent)]
    Form(#[from] FormError),

    /// The caller's handler failed; passed through unclassified
    #[error("submit handler failed: {0}")]
    Handler(E),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FormError::from(InitializationError::Failed {
            message: "network unreachable".into(),
        });
        assert_eq!(
            err.to_string(),
            "form defaults failed to resolve: network unreachable"
        );
        assert!(err.is_initialization());
    }

    #[test]
    fn test_invalid_pattern_error() {
        let source = regex::Regex::new("(").unwrap_err();
        let err = FormError::InvalidPattern {
            pattern: "(".into(),
            source,
        };
        assert!(err.to_string().contains("invalid pattern '('"));
        assert!(!err.is_initialization());
    }

    #[test]
    fn test_severity_classification() {
        let failed = FormError::from(InitializationError::Failed {
            message: "boom".into(),
        });
        assert_eq!(failed.severity(), ErrorSeverity::Critical);
        assert_eq!(
            FormError::from(InitializationError::Pending).severity(),
            ErrorSeverity::Error
        );
        assert_eq!(
            FormError::from(InitializationError::AlreadyStarted).severity(),
            ErrorSeverity::Warning
        );
    }

    #[test]
    fn test_submit_error_wraps_handler_error() {
        let err: SubmitError<std::io::Error> =
            SubmitError::Handler(std::io::Error::other("disk full"));
        assert_eq!(err.to_string(), "submit handler failed: disk full");
    }
}
