//! # Formwork Common
//!
//! Foundational pieces shared across the Formwork crates.
//!
//! ## Modules
//!
//! - [`error`] - Error severity classification
//! - [`logging`] - Helpers for rendering values inside log statements

pub mod error;
pub mod logging;

pub use error::{ErrorSeverity, Severity};
pub use logging::Pretty;
