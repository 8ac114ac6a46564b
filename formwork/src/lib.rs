//! # Formwork
//!
//! A reactive form-state engine. A [`Form`] session tracks a nested value
//! tree, per-field validation results and interaction metadata
//! (touched/dirty/disabled), manages field arrays with stable item identity,
//! and notifies subscribers of changes at the granularity they asked for.
//!
//! ## Modules
//!
//! - [`path`] - Dotted/indexed path addressing into the value tree
//! - [`registry`] - Value tree and per-field metadata
//! - [`rules`] / [`validation`] - Validation rules and their evaluation
//! - [`error_tree`] - Per-field errors in the shape of the value tree
//! - [`defaults`] - Asynchronous resolution of initial values
//! - [`array`] - Field arrays with stable keys
//! - [`bus`] - Subscriptions and change events
//! - [`submit`] - Submission state machine
//! - [`options`] - Session options and configuration sources
//! - [`form`] - The session facade
//!
//! ## Example
//!
//! ```ignore
//! use formwork::{Form, FormOptions, RegisterOptions, ValidationRule};
//! use serde_json::json;
//!
//! let form = Form::with_defaults(FormOptions::default(), json!({"username": ""}));
//! form.register(
//!     "username",
//!     vec![ValidationRule::required("Username is required!")],
//!     RegisterOptions::new(),
//! )?;
//! assert!(!form.validate_form().await?);
//! ```

pub mod array;
pub mod bus;
pub mod defaults;
pub mod error;
pub mod error_tree;
pub mod form;
pub mod options;
pub mod path;
pub mod registry;
pub mod rules;
pub mod submit;
pub mod validation;

pub use array::{ArrayItem, ArrayOp, FieldArray, FieldArrayManager};
pub use bus::{FormEvent, Selector, Subscription, SubscriptionBus};
pub use defaults::{resolver_fn, DefaultsResolver, FnResolver, ResolveError, StaticDefaults};
pub use error::{FormError, InitializationError, Result, SubmitError};
pub use error_tree::{ErrorTree, FieldError};
pub use form::{FieldState, Form, FormState, SessionStatus, SetValueOptions};
pub use options::{CriteriaMode, FormOptions, RevalidateMode, ValidationMode};
pub use path::{FieldPath, PathSegment};
pub use registry::{RegisterOptions, RegisterOutcome, ValueAs};
pub use rules::{RuleKind, RuleResult, ValidationRule};
pub use submit::{SubmissionState, SubmitOutcome, SubmitPhase};
pub use validation::ValidationEngine;
