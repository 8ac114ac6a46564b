//! Validation rules attached to registered fields.
//!
//! Built-in rules are plain data. Custom rules wrap a caller-supplied check
//! that receives the field value and a snapshot of the whole tree; a custom
//! rule may declare the paths it reads so that writes to them re-run it.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FormError, Result};
use crate::path::FieldPath;

/// Outcome of a single check: `Err` carries the message shown to the user.
pub type RuleResult = std::result::Result<(), String>;

pub type SyncCheck = Arc<dyn Fn(&Value, &Value) -> RuleResult + Send + Sync>;
pub type AsyncCheck = Arc<dyn Fn(Value, Value) -> BoxFuture<'static, RuleResult> + Send + Sync>;

/// The category of a rule, reported on every [`FieldError`](crate::FieldError).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Required,
    Pattern,
    MinLength,
    MaxLength,
    Min,
    Max,
    Custom,
    /// Injected with `set_error`, not produced by a rule
    Manual,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Required => "required",
            RuleKind::Pattern => "pattern",
            RuleKind::MinLength => "min_length",
            RuleKind::MaxLength => "max_length",
            RuleKind::Min => "min",
            RuleKind::Max => "max",
            RuleKind::Custom => "custom",
            RuleKind::Manual => "manual",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compiled pattern that must match the whole value.
#[derive(Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{source})$")).map_err(|e| {
            FormError::InvalidPattern {
                pattern: source.to_string(),
                source: e,
            }
        })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.source).finish()
    }
}

/// A custom check, run inline or awaited.
#[derive(Clone)]
pub enum Check {
    Sync(SyncCheck),
    Async(AsyncCheck),
}

impl PartialEq for Check {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Check::Sync(a), Check::Sync(b)) => Arc::ptr_eq(a, b),
            (Check::Async(a), Check::Async(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Check::Sync(_) => f.write_str("Check::Sync(..)"),
            Check::Async(_) => f.write_str("Check::Async(..)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleSpec {
    Required,
    Pattern(Pattern),
    MinLength(usize),
    MaxLength(usize),
    Min(f64),
    Max(f64),
    Custom { check: Check, deps: Vec<FieldPath> },
}

/// A named rule with the message it reports on failure.
///
/// Two rules are equal when they have the same name, message and
/// configuration; custom checks compare by identity, so re-registering a
/// field with clones of the same rules is recognized as a no-op.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRule {
    name: String,
    message: String,
    spec: RuleSpec,
}

impl ValidationRule {
    pub fn required(message: impl Into<String>) -> Self {
        Self::builtin(RuleKind::Required, message, RuleSpec::Required)
    }

    /// A rule that fails unless the whole value matches `pattern`.
    pub fn pattern(pattern: &str, message: impl Into<String>) -> Result<Self> {
        Ok(Self::builtin(
            RuleKind::Pattern,
            message,
            RuleSpec::Pattern(Pattern::new(pattern)?),
        ))
    }

    pub fn min_length(min: usize, message: impl Into<String>) -> Self {
        Self::builtin(RuleKind::MinLength, message, RuleSpec::MinLength(min))
    }

    pub fn max_length(max: usize, message: impl Into<String>) -> Self {
        Self::builtin(RuleKind::MaxLength, message, RuleSpec::MaxLength(max))
    }

    pub fn min(min: f64, message: impl Into<String>) -> Self {
        Self::builtin(RuleKind::Min, message, RuleSpec::Min(min))
    }

    pub fn max(max: f64, message: impl Into<String>) -> Self {
        Self::builtin(RuleKind::Max, message, RuleSpec::Max(max))
    }

    /// A named synchronous check over the field value and the whole tree.
    pub fn custom<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value, &Value) -> RuleResult + Send + Sync + 'static,
    {
        let name = name.into();
        Self {
            message: name.clone(),
            name,
            spec: RuleSpec::Custom {
                check: Check::Sync(Arc::new(check)),
                deps: Vec::new(),
            },
        }
    }

    /// A named asynchronous check. It receives owned snapshots so the
    /// returned future does not borrow form state.
    pub fn custom_async<F, Fut>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(Value, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RuleResult> + Send + 'static,
    {
        let name = name.into();
        let check: AsyncCheck = Arc::new(move |value, tree| check(value, tree).boxed());
        Self {
            message: name.clone(),
            name,
            spec: RuleSpec::Custom {
                check: Check::Async(check),
                deps: Vec::new(),
            },
        }
    }

    /// Declare the other paths a custom rule reads.
    ///
    /// Has no effect on built-in rules.
    pub fn depends_on<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<FieldPath>,
    {
        if let RuleSpec::Custom { deps, .. } = &mut self.spec {
            deps.extend(paths.into_iter().map(Into::into));
        }
        self
    }

    /// Replace the name under which failures are recorded.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn builtin(kind: RuleKind, message: impl Into<String>, spec: RuleSpec) -> Self {
        Self {
            name: kind.as_str().to_string(),
            message: message.into(),
            spec,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn spec(&self) -> &RuleSpec {
        &self.spec
    }

    pub fn kind(&self) -> RuleKind {
        match self.spec {
            RuleSpec::Required => RuleKind::Required,
            RuleSpec::Pattern(_) => RuleKind::Pattern,
            RuleSpec::MinLength(_) => RuleKind::MinLength,
            RuleSpec::MaxLength(_) => RuleKind::MaxLength,
            RuleSpec::Min(_) => RuleKind::Min,
            RuleSpec::Max(_) => RuleKind::Max,
            RuleSpec::Custom { .. } => RuleKind::Custom,
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(
            self.spec,
            RuleSpec::Custom {
                check: Check::Async(_),
                ..
            }
        )
    }

    /// Paths this rule reads besides its own field.
    pub fn deps(&self) -> &[FieldPath] {
        match &self.spec {
            RuleSpec::Custom { deps, .. } => deps,
            _ => &[],
        }
    }

    /// Cross-field rules run even after another rule on the field failed.
    pub fn is_cross_field(&self) -> bool {
        !self.deps().is_empty()
    }
}

/// Empty means null, absent, an empty string or an empty sequence.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Length in characters for strings, in items for sequences.
pub fn value_length(value: &Value) -> Option<usize> {
    match value {
        Value::String(text) => Some(text.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}
