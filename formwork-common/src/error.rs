//! Error classification shared by the Formwork crates
//!
//! Engine errors are few, and most failure conditions in a form session are
//! represented as data rather than `Err` values. The ones that do surface as
//! errors carry a severity so callers can pick a log level or decide whether
//! the session is still usable.

/// Severity levels for error classification
///
/// # Severity Levels
///
/// - **Warning**: The operation was ignored or degraded, the session carries on.
/// - **Error**: The operation failed, the session remains usable.
/// - **Critical**: The session cannot be used any more.
///
/// # Examples
///
/// ```rust
/// use formwork_common::ErrorSeverity;
///
/// // A rejected re-entrant submit is only worth a warning
/// let rejected = ErrorSeverity::Warning;
///
/// // A failed defaults resolution ends the session
/// let init_failed = ErrorSeverity::Critical;
/// assert!(init_failed > rejected);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Potential issue but operation can proceed
    Warning,

    /// Operation failed but the session can continue
    Error,

    /// Session cannot continue
    Critical,
}

impl ErrorSeverity {
    /// Whether an error of this severity leaves the session unusable.
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorSeverity::Critical)
    }
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorSeverity::Warning => "warning",
            ErrorSeverity::Error => "error",
            ErrorSeverity::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// Trait for error types that have severity levels
///
/// Every Formwork error type implements this so logging and callers classify
/// failures the same way across crates.
///
/// # Example
///
/// ```rust
/// use formwork_common::{ErrorSeverity, Severity};
///
/// #[derive(Debug)]
/// enum LoadError {
///     SourceUnavailable,
///     SlowSource,
/// }
///
/// impl Severity for LoadError {
///     fn severity(&self) -> ErrorSeverity {
///         match self {
///             LoadError::SourceUnavailable => ErrorSeverity::Critical,
///             LoadError::SlowSource => ErrorSeverity::Warning,
///         }
///     }
/// }
///
/// assert_eq!(LoadError::SourceUnavailable.severity(), ErrorSeverity::Critical);
/// ```
pub trait Severity {
    /// Get the severity level of this error
    fn severity(&self) -> ErrorSeverity;
}
