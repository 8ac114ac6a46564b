//! Per-field validation failures.
//!
//! Errors are stored flat, keyed by [`FieldPath`], and rendered into the
//! nested shape of the value tree on demand with [`ErrorTree::to_value`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::{self, FieldPath, Reindexed};
use crate::rules::RuleKind;

/// The active error of one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Kind of the rule that produced `message`
    pub kind: RuleKind,
    pub message: String,
    /// Every failure observed in the last validation, by rule name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub types: BTreeMap<String, String>,
}

impl FieldError {
    pub fn new(kind: RuleKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            types: BTreeMap::new(),
        }
    }

    /// An error injected by the caller rather than a rule.
    pub fn manual(message: impl Into<String>) -> Self {
        Self::new(RuleKind::Manual, message)
    }

    pub fn with_type(mut self, name: impl Into<String>, message: impl Into<String>) -> Self {
        self.types.insert(name.into(), message.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorTree {
    entries: BTreeMap<FieldPath, FieldError>,
}

impl ErrorTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, path: &FieldPath) -> Option<&FieldError> {
        self.entries.get(path)
    }

    pub fn message(&self, path: &FieldPath) -> Option<&str> {
        self.entries.get(path).map(|e| e.message.as_str())
    }

    pub fn contains(&self, path: &FieldPath) -> bool {
        self.entries.contains_key(path)
    }

    /// True if any error lies at or beneath `path`.
    pub fn has_errors_under(&self, path: &FieldPath) -> bool {
        self.entries.keys().any(|p| p.starts_with(path))
    }

    /// Set or clear the error at `path`. Returns whether anything changed.
    pub fn set(&mut self, path: FieldPath, error: Option<FieldError>) -> bool {
        match error {
            Some(error) => self.entries.insert(path, error.clone()).as_ref() != Some(&error),
            None => self.entries.remove(&path).is_some(),
        }
    }

    pub fn insert(&mut self, path: FieldPath, error: FieldError) -> Option<FieldError> {
        self.entries.insert(path, error)
    }

    pub fn remove(&mut self, path: &FieldPath) -> Option<FieldError> {
        self.entries.remove(path)
    }

    /// Remove every error at or beneath `path`, returning the cleared paths.
    pub fn clear_subtree(&mut self, path: &FieldPath) -> Vec<FieldPath> {
        let cleared: Vec<FieldPath> = self
            .entries
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        for p in &cleared {
            self.entries.remove(p);
        }
        cleared
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldPath, &FieldError)> {
        self.entries.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &FieldPath> {
        self.entries.keys()
    }

    /// Copy of the errors at or beneath `path`.
    pub fn subtree(&self, path: &FieldPath) -> ErrorTree {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(p, _)| p.starts_with(path))
                .map(|(p, e)| (p.clone(), e.clone()))
                .collect(),
        }
    }

    /// Move errors inside the array at `array` through an index mapping.
    /// Errors of removed items are dropped.
    pub fn reindex(&mut self, array: &FieldPath, mapping: &[Option<usize>]) {
        let entries = std::mem::take(&mut self.entries);
        for (p, error) in entries {
            match p.reindex(array, mapping) {
                Reindexed::Unaffected => {
                    self.entries.insert(p, error);
                }
                Reindexed::Moved(moved) => {
                    self.entries.insert(moved, error);
                }
                Reindexed::Dropped => {}
            }
        }
    }

    /// Messages arranged in the nested shape of the value tree.
    pub fn to_value(&self) -> Value {
        let mut root = Value::Object(Default::default());
        for (p, error) in &self.entries {
            path::assign(&mut root, p, Value::String(error.message.clone()));
        }
        root
    }
}

impl FromIterator<(FieldPath, FieldError)> for ErrorTree {
    fn from_iter<T: IntoIterator<Item = (FieldPath, FieldError)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
