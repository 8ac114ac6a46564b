//! Rule evaluation for single fields.
//!
//! The engine is stateless: it evaluates a field's rules against a value and
//! a tree snapshot and hands back a [`Verdict`]. Asynchronous checks are not
//! awaited here; they come back as an [`AsyncJob`] that owns its snapshots and
//! can be driven without touching form state. Whoever applies the job's
//! result decides whether it is still current.

use serde_json::Value;
use tracing::trace;

use crate::error_tree::FieldError;
use crate::options::CriteriaMode;
use crate::path::FieldPath;
use crate::rules::{
    is_empty_value, value_length, AsyncCheck, Check, RuleKind, RuleSpec, ValidationRule,
};

/// One failed rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: RuleKind,
    pub name: String,
    pub message: String,
}

/// An asynchronous check waiting to run.
#[derive(Clone)]
pub struct PendingCheck {
    pub name: String,
    pub check: AsyncCheck,
    pub cross_field: bool,
}

impl std::fmt::Debug for PendingCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCheck")
            .field("name", &self.name)
            .field("cross_field", &self.cross_field)
            .finish_non_exhaustive()
    }
}

/// Result of the synchronous part of a field validation.
#[derive(Debug, Clone, Default)]
pub struct Verdict {
    pub failures: Vec<Failure>,
    pub pending: Vec<PendingCheck>,
}

impl Verdict {
    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// The error as it stands before any asynchronous check finishes.
    pub fn error(&self) -> Option<FieldError> {
        build_error(&self.failures)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationEngine {
    criteria: CriteriaMode,
}

impl ValidationEngine {
    pub fn new(criteria: CriteriaMode) -> Self {
        Self { criteria }
    }

    pub fn criteria(&self) -> CriteriaMode {
        self.criteria
    }

    /// Evaluate `rules` in registration order.
    ///
    /// With [`CriteriaMode::FirstError`] the first failing rule stops the
    /// remaining ones, except cross-field rules which always run. Asynchronous
    /// checks are deferred, and only when nothing failed synchronously or when
    /// they are cross-field.
    pub fn evaluate(&self, rules: &[ValidationRule], value: &Value, tree: &Value) -> Verdict {
        let collect_all = self.criteria == CriteriaMode::All;
        let mut verdict = Verdict::default();

        for rule in rules {
            let skip = !collect_all && !verdict.failures.is_empty() && !rule.is_cross_field();
            if skip || rule.is_async() {
                continue;
            }
            if let Err(message) = evaluate_rule(rule, value, tree) {
                trace!(rule = rule.name(), %message, "rule failed");
                verdict.failures.push(Failure {
                    kind: rule.kind(),
                    name: rule.name().to_string(),
                    message,
                });
            }
        }

        for rule in rules {
            let RuleSpec::Custom {
                check: Check::Async(check),
                ..
            } = rule.spec()
            else {
                continue;
            };
            if collect_all || verdict.failures.is_empty() || rule.is_cross_field() {
                verdict.pending.push(PendingCheck {
                    name: rule.name().to_string(),
                    check: check.clone(),
                    cross_field: rule.is_cross_field(),
                });
            }
        }
        verdict
    }

    /// Package the deferred part of a verdict as a job.
    pub fn job(
        &self,
        path: FieldPath,
        epoch: u64,
        verdict: Verdict,
        value: Value,
        tree: Value,
    ) -> Option<AsyncJob> {
        if !verdict.is_pending() {
            return None;
        }
        Some(AsyncJob {
            path,
            epoch,
            criteria: self.criteria,
            failures: verdict.failures,
            pending: verdict.pending,
            value,
            tree,
        })
    }
}

/// Deferred checks for one field, carrying their own snapshots.
#[derive(Debug)]
pub struct AsyncJob {
    pub path: FieldPath,
    /// Validation generation the job belongs to
    pub epoch: u64,
    criteria: CriteriaMode,
    failures: Vec<Failure>,
    pending: Vec<PendingCheck>,
    value: Value,
    tree: Value,
}

/// A finished job, ready to be applied if still current.
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncOutcome {
    pub path: FieldPath,
    pub epoch: u64,
    pub error: Option<FieldError>,
}

impl AsyncJob {
    /// Await the checks in order. Under first-error criteria a failure skips
    /// the remaining checks that are not cross-field.
    pub async fn run(self) -> AsyncOutcome {
        let mut failures = self.failures;
        for pending in self.pending {
            let short_circuit = self.criteria == CriteriaMode::FirstError && !failures.is_empty();
            if short_circuit && !pending.cross_field {
                continue;
            }
            let result = (pending.check)(self.value.clone(), self.tree.clone()).await;
            if let Err(message) = result {
                trace!(path = %self.path, rule = %pending.name, %message, "async rule failed");
                failures.push(Failure {
                    kind: RuleKind::Custom,
                    name: pending.name,
                    message,
                });
            }
        }
        AsyncOutcome {
            path: self.path,
            epoch: self.epoch,
            error: build_error(&failures),
        }
    }
}

fn build_error(failures: &[Failure]) -> Option<FieldError> {
    let first = failures.first()?;
    let mut error = FieldError::new(first.kind, first.message.clone());
    for failure in failures {
        error
            .types
            .entry(failure.name.clone())
            .or_insert_with(|| failure.message.clone());
    }
    Some(error)
}

/// Evaluate one synchronous rule. Asynchronous rules pass here.
pub fn evaluate_rule(rule: &ValidationRule, value: &Value, tree: &Value) -> Result<(), String> {
    let fail = || Err(rule.message().to_string());
    match rule.spec() {
        RuleSpec::Required => {
            if is_empty_value(value) {
                return fail();
            }
        }
        RuleSpec::Pattern(pattern) => {
            if is_empty_value(value) {
                return Ok(());
            }
            let matched = match value {
                Value::String(text) => pattern.is_match(text),
                Value::Number(number) => pattern.is_match(&number.to_string()),
                Value::Bool(flag) => pattern.is_match(&flag.to_string()),
                _ => true,
            };
            if !matched {
                return fail();
            }
        }
        RuleSpec::MinLength(min) => {
            if !is_empty_value(value) && value_length(value).is_some_and(|len| len < *min) {
                return fail();
            }
        }
        RuleSpec::MaxLength(max) => {
            if value_length(value).is_some_and(|len| len > *max) {
                return fail();
            }
        }
        RuleSpec::Min(min) => {
            if value.as_f64().is_some_and(|n| n < *min) {
                return fail();
            }
        }
        RuleSpec::Max(max) => {
            if value.as_f64().is_some_and(|n| n > *max) {
                return fail();
            }
        }
        RuleSpec::Custom {
            check: Check::Sync(check),
            ..
        } => {
            return check(value, tree).map_err(|message| {
                if message.is_empty() {
                    rule.message().to_string()
                } else {
                    message
                }
            });
        }
        RuleSpec::Custom {
            check: Check::Async(_),
            ..
        } => {}
    }
    Ok(())
}
