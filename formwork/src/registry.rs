//! Authoritative value tree and per-field metadata.
//!
//! Dirty state is never stored: it is derived by comparing the value at a
//! path against the defaults snapshot at the same path. A missing value and
//! `null` compare equal.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::path::{self, FieldPath, Reindexed};
use crate::rules::ValidationRule;

/// A predicate over the whole value tree deciding whether a field is disabled.
#[derive(Clone)]
pub struct DisabledWhen(Arc<dyn Fn(&Value) -> bool + Send + Sync>);

impl DisabledWhen {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }

    pub fn evaluate(&self, tree: &Value) -> bool {
        (self.0)(tree)
    }
}

impl PartialEq for DisabledWhen {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for DisabledWhen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DisabledWhen(..)")
    }
}

/// Write-time coercion applied to values written into a field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueAs {
    #[default]
    Raw,
    /// Text is parsed as a number; unparseable text becomes null
    Number,
    /// Text is parsed as a date and stored as `YYYY-MM-DD`
    Date,
}

impl ValueAs {
    pub fn coerce(&self, value: Value) -> Value {
        match self {
            ValueAs::Raw => value,
            ValueAs::Number => coerce_number(value),
            ValueAs::Date => coerce_date(value),
        }
    }
}

fn coerce_number(value: Value) -> Value {
    match value {
        Value::Number(_) => value,
        Value::String(text) => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(|n| match n.as_f64() {
                // keep integers integral so `42` does not read back as `42.0`
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    Value::Number((f as i64).into())
                }
                _ => Value::Number(n),
            })
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn coerce_date(value: Value) -> Value {
    let Value::String(text) = &value else {
        return Value::Null;
    };
    let text = text.trim();
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|d| d.date_naive()));
    match date {
        Some(date) => Value::String(date.format("%Y-%m-%d").to_string()),
        None => Value::Null,
    }
}

/// Options accepted by `register`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegisterOptions {
    pub disabled: bool,
    pub disabled_when: Option<DisabledWhen>,
    pub value_as: ValueAs,
}

impl RegisterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn disabled_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.disabled_when = Some(DisabledWhen::new(predicate));
        self
    }

    pub fn value_as(mut self, value_as: ValueAs) -> Self {
        self.value_as = value_as;
        self
    }
}

/// What `register` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Added,
    /// Same rules as before; nothing changed
    Unchanged,
    /// Different rules replaced the previous ones
    Replaced,
}

#[derive(Debug, Clone, Default)]
pub struct FieldMeta {
    pub touched: bool,
    pub rules: Vec<ValidationRule>,
    pub options: RegisterOptions,
    /// Last evaluated disabled state
    pub disabled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    values: Value,
    defaults: Value,
    fields: BTreeMap<FieldPath, FieldMeta>,
}

impl FieldRegistry {
    pub fn new(defaults: Value) -> Self {
        Self {
            values: defaults.clone(),
            defaults,
            fields: BTreeMap::new(),
        }
    }

    pub fn register(
        &mut self,
        path: FieldPath,
        rules: Vec<ValidationRule>,
        options: RegisterOptions,
    ) -> RegisterOutcome {
        let disabled = options.disabled
            || options
                .disabled_when
                .as_ref()
                .is_some_and(|p| p.evaluate(&self.values));

        if let Some(meta) = self.fields.get_mut(&path) {
            let outcome = if meta.rules == rules {
                RegisterOutcome::Unchanged
            } else {
                meta.rules = rules;
                RegisterOutcome::Replaced
            };
            meta.options = options;
            meta.disabled = disabled;
            trace!(path = %path, ?outcome, "field re-registered");
            return outcome;
        }

        debug!(path = %path, rules = rules.len(), disabled, "field registered");
        self.fields.insert(
            path,
            FieldMeta {
                touched: false,
                rules,
                options,
                disabled,
            },
        );
        RegisterOutcome::Added
    }

    /// Drop the field at `path` and every field beneath it. With
    /// `drop_value` the value is removed from the tree too.
    pub fn unregister(&mut self, path: &FieldPath, drop_value: bool) -> Vec<FieldPath> {
        let removed: Vec<FieldPath> = self
            .fields
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        for p in &removed {
            self.fields.remove(p);
        }
        if drop_value && !removed.is_empty() {
            path::remove(&mut self.values, path);
        }
        removed
    }

    pub fn is_registered(&self, path: &FieldPath) -> bool {
        self.fields.contains_key(path)
    }

    /// True if a registered field lies at, above or beneath `path`, or the
    /// tree already holds a value there.
    pub fn is_known(&self, path: &FieldPath) -> bool {
        path.is_root()
            || self.fields.keys().any(|p| p.is_related(path))
            || path::lookup(&self.values, path).is_some()
    }

    pub fn meta(&self, path: &FieldPath) -> Option<&FieldMeta> {
        self.fields.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &FieldPath> {
        self.fields.keys()
    }

    pub fn rules(&self, path: &FieldPath) -> &[ValidationRule] {
        self.fields.get(path).map(|m| m.rules.as_slice()).unwrap_or(&[])
    }

    /// Fields whose rules read `path`, other than `path` itself.
    pub fn dependents(&self, path: &FieldPath) -> Vec<FieldPath> {
        self.fields
            .iter()
            .filter(|(p, meta)| {
                *p != path
                    && meta
                        .rules
                        .iter()
                        .any(|r| r.deps().iter().any(|d| d.is_related(path)))
            })
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Write a value, applying the field's coercion. Returns the stored value.
    pub fn write(&mut self, path: &FieldPath, value: Value) -> Value {
        let value = match self.fields.get(path) {
            Some(meta) => meta.options.value_as.coerce(value),
            None => value,
        };
        path::assign(&mut self.values, path, value.clone());
        value
    }

    pub fn value(&self, path: &FieldPath) -> Option<&Value> {
        path::lookup(&self.values, path)
    }

    pub fn values(&self) -> &Value {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Value {
        &mut self.values
    }

    pub fn default_value(&self, path: &FieldPath) -> Option<&Value> {
        path::lookup(&self.defaults, path)
    }

    pub fn defaults(&self) -> &Value {
        &self.defaults
    }

    pub fn is_dirty(&self, path: &FieldPath) -> bool {
        let current = self.value(path).unwrap_or(&Value::Null);
        let default = self.default_value(path).unwrap_or(&Value::Null);
        !equivalent(current, default)
    }

    pub fn is_form_dirty(&self) -> bool {
        !equivalent(&self.values, &self.defaults)
    }

    pub fn dirty_fields(&self) -> Vec<FieldPath> {
        self.fields
            .keys()
            .filter(|p| self.is_dirty(p))
            .cloned()
            .collect()
    }

    pub fn is_touched(&self, path: &FieldPath) -> bool {
        self.fields.get(path).is_some_and(|m| m.touched)
    }

    /// Returns whether the flag changed.
    pub fn set_touched(&mut self, path: &FieldPath, touched: bool) -> bool {
        match self.fields.get_mut(path) {
            Some(meta) if meta.touched != touched => {
                meta.touched = touched;
                true
            }
            _ => false,
        }
    }

    pub fn touched_fields(&self) -> Vec<FieldPath> {
        self.fields
            .iter()
            .filter(|(_, m)| m.touched)
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// A field is disabled when it, or a registered ancestor, is.
    pub fn is_disabled(&self, path: &FieldPath) -> bool {
        self.fields
            .iter()
            .any(|(p, m)| m.disabled && path.starts_with(p))
    }

    /// Re-evaluate `disabled_when` predicates against the current tree.
    /// Returns the fields whose state flipped.
    pub fn refresh_disabled(&mut self) -> Vec<(FieldPath, bool)> {
        let mut changed = Vec::new();
        for (p, meta) in self.fields.iter_mut() {
            let disabled = meta.options.disabled
                || meta
                    .options
                    .disabled_when
                    .as_ref()
                    .is_some_and(|pred| pred.evaluate(&self.values));
            if disabled != meta.disabled {
                meta.disabled = disabled;
                changed.push((p.clone(), disabled));
            }
        }
        changed
    }

    /// Values with disabled fields left out.
    pub fn enabled_values(&self) -> Value {
        let mut values = self.values.clone();
        for (p, meta) in &self.fields {
            if meta.disabled {
                path::remove(&mut values, p);
            }
        }
        values
    }

    /// Replace the tree with the defaults (or new defaults) and clear
    /// touched flags. Registrations survive.
    pub fn reset(&mut self, defaults: Option<Value>) {
        if let Some(defaults) = defaults {
            self.defaults = defaults;
        }
        self.values = self.defaults.clone();
        for meta in self.fields.values_mut() {
            meta.touched = false;
        }
        self.refresh_disabled();
    }

    /// Move metadata inside the array at `array` through an index mapping.
    /// Returns the paths whose metadata was destroyed.
    pub fn reindex(&mut self, array: &FieldPath, mapping: &[Option<usize>]) -> Vec<FieldPath> {
        let fields = std::mem::take(&mut self.fields);
        let mut dropped = Vec::new();
        for (p, meta) in fields {
            match p.reindex(array, mapping) {
                Reindexed::Unaffected => {
                    self.fields.insert(p, meta);
                }
                Reindexed::Moved(moved) => {
                    self.fields.insert(moved, meta);
                }
                Reindexed::Dropped => dropped.push(p),
            }
        }
        dropped
    }
}

/// Structural equality where a missing object key equals `null`.
fn equivalent(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => a.keys().chain(b.keys()).all(|k| {
            equivalent(
                a.get(k).unwrap_or(&Value::Null),
                b.get(k).unwrap_or(&Value::Null),
            )
        }),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| equivalent(x, y))
        }
        _ => a == b,
    }
}
