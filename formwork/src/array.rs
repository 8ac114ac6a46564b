//! Ordered lists of records with position-independent identity.
//!
//! Each array path owns a list of ULID keys parallel to its items. Keys are
//! generated once when an item is created and travel with it; every
//! operation also yields an index mapping (`mapping[old] = new`) so that
//! metadata attached to item paths can follow its record.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use ulid::{Generator, Ulid};

use crate::error::Result;
use crate::form::Form;
use crate::path::{FieldPath, Reindexed};

/// Structural array edit.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayOp {
    Append(Value),
    Prepend(Value),
    Insert(usize, Value),
    Remove(usize),
    Move { from: usize, to: usize },
    Swap(usize, usize),
    Replace(usize, Value),
}

impl ArrayOp {
    pub fn name(&self) -> &'static str {
        match self {
            ArrayOp::Append(_) => "append",
            ArrayOp::Prepend(_) => "prepend",
            ArrayOp::Insert(..) => "insert",
            ArrayOp::Remove(_) => "remove",
            ArrayOp::Move { .. } => "move",
            ArrayOp::Swap(..) => "swap",
            ArrayOp::Replace(..) => "replace",
        }
    }
}

/// An item together with its stable key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArrayItem {
    pub key: Ulid,
    pub value: Value,
}

/// What an applied operation did to the array.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayChange {
    /// `mapping[old]` is the new index of the old item, `None` if removed
    pub mapping: Vec<Option<usize>>,
    /// Index whose record was replaced in place, if any
    pub replaced: Option<usize>,
}

impl ArrayChange {
    pub fn is_identity(&self) -> bool {
        self.mapping
            .iter()
            .enumerate()
            .all(|(old, new)| *new == Some(old))
    }
}

pub struct FieldArrayManager {
    keys: BTreeMap<FieldPath, Vec<Ulid>>,
    generator: Generator,
}

impl Default for FieldArrayManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FieldArrayManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldArrayManager")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl FieldArrayManager {
    pub fn new() -> Self {
        Self {
            keys: BTreeMap::new(),
            generator: Generator::new(),
        }
    }

    fn next_key(&mut self) -> Ulid {
        // overflow within one millisecond falls back to a fresh random key
        self.generator.generate().unwrap_or_else(|_| Ulid::new())
    }

    /// Keys for the array at `path`, grown or trimmed to `len`.
    ///
    /// Arrays written wholesale (e.g. through `set_value`) keep the keys of
    /// their leading items.
    pub fn keys(&mut self, path: &FieldPath, len: usize) -> &[Ulid] {
        let mut keys = self.keys.remove(path).unwrap_or_default();
        while keys.len() < len {
            keys.push(self.next_key());
        }
        keys.truncate(len);
        self.keys.entry(path.clone()).or_insert(keys)
    }

    /// Apply `op` to `items` and the parallel keys.
    ///
    /// Returns `None`, leaving everything untouched, when an index is out of
    /// range. Insert positions past the end are clamped.
    pub fn apply(
        &mut self,
        path: &FieldPath,
        items: &mut Vec<Value>,
        op: ArrayOp,
    ) -> Option<ArrayChange> {
        let len = items.len();
        let mut keys = self.keys(path, len).to_vec();
        let mut order: Vec<Option<usize>> = (0..len).map(Some).collect();
        let mut replaced = None;

        match op {
            ArrayOp::Append(value) => {
                items.push(value);
                keys.push(self.next_key());
                order.push(None);
            }
            ArrayOp::Prepend(value) => {
                items.insert(0, value);
                keys.insert(0, self.next_key());
                order.insert(0, None);
            }
            ArrayOp::Insert(index, value) => {
                let index = index.min(len);
                items.insert(index, value);
                keys.insert(index, self.next_key());
                order.insert(index, None);
            }
            ArrayOp::Remove(index) if index < len => {
                items.remove(index);
                keys.remove(index);
                order.remove(index);
            }
            ArrayOp::Move { from, to } if from < len && to < len => {
                let item = items.remove(from);
                items.insert(to, item);
                let key = keys.remove(from);
                keys.insert(to, key);
                let slot = order.remove(from);
                order.insert(to, slot);
            }
            ArrayOp::Swap(a, b) if a < len && b < len => {
                items.swap(a, b);
                keys.swap(a, b);
                order.swap(a, b);
            }
            ArrayOp::Replace(index, value) if index < len => {
                items[index] = value;
                keys[index] = self.next_key();
                replaced = Some(index);
            }
            op => {
                warn!(path = %path, op = op.name(), len, "array index out of range");
                return None;
            }
        }

        let mut mapping = vec![None; len];
        for (new, slot) in order.iter().enumerate() {
            if let Some(old) = slot {
                mapping[*old] = Some(new);
            }
        }

        self.keys.insert(path.clone(), keys);
        self.reindex_nested(path, &mapping, replaced);
        debug!(path = %path, items = items.len(), "array updated");
        Some(ArrayChange { mapping, replaced })
    }

    /// Move key lists of arrays nested inside items along with their items.
    fn reindex_nested(
        &mut self,
        array: &FieldPath,
        mapping: &[Option<usize>],
        replaced: Option<usize>,
    ) {
        let nested: Vec<FieldPath> = self
            .keys
            .keys()
            .filter(|p| array.is_ancestor_of(p))
            .cloned()
            .collect();
        let mut moved = Vec::new();
        for p in nested {
            let Some(keys) = self.keys.remove(&p) else {
                continue;
            };
            let replaced_item = replaced.is_some_and(|i| p.starts_with(&array.index(i)));
            if replaced_item {
                continue;
            }
            match p.reindex(array, mapping) {
                Reindexed::Unaffected => moved.push((p, keys)),
                Reindexed::Moved(to) => moved.push((to, keys)),
                Reindexed::Dropped => {}
            }
        }
        self.keys.extend(moved);
    }

    /// Items of the array at `path` paired with their keys.
    pub fn items(&mut self, path: &FieldPath, items: &[Value]) -> Vec<ArrayItem> {
        let keys = self.keys(path, items.len()).to_vec();
        keys.into_iter()
            .zip(items.iter().cloned())
            .map(|(key, value)| ArrayItem { key, value })
            .collect()
    }

    /// Forget every key; the next read generates fresh ones.
    pub fn clear(&mut self) {
        self.keys.clear();
    }
}

/// Handle for editing one array field of a [`Form`].
///
/// Every edit writes the new array through the form, so subscribers see a
/// value change at the array path and the errors beneath it are re-derived.
pub struct FieldArray<'a> {
    form: &'a Form,
    path: FieldPath,
}

impl<'a> FieldArray<'a> {
    pub(crate) fn new(form: &'a Form, path: FieldPath) -> Self {
        Self { form, path }
    }

    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    /// Items with their stable keys.
    pub fn fields(&self) -> Result<Vec<ArrayItem>> {
        self.form.array_items(&self.path)
    }

    pub fn append(&self, record: Value) -> Result<bool> {
        self.form.apply_array_op(&self.path, ArrayOp::Append(record))
    }

    pub fn prepend(&self, record: Value) -> Result<bool> {
        self.form.apply_array_op(&self.path, ArrayOp::Prepend(record))
    }

    pub fn insert(&self, index: usize, record: Value) -> Result<bool> {
        self.form.apply_array_op(&self.path, ArrayOp::Insert(index, record))
    }

    pub fn remove(&self, index: usize) -> Result<bool> {
        self.form.apply_array_op(&self.path, ArrayOp::Remove(index))
    }

    pub fn move_item(&self, from: usize, to: usize) -> Result<bool> {
        self.form.apply_array_op(&self.path, ArrayOp::Move { from, to })
    }

    pub fn swap(&self, a: usize, b: usize) -> Result<bool> {
        self.form.apply_array_op(&self.path, ArrayOp::Swap(a, b))
    }

    /// Replace the record at `index`. The new record gets a new key.
    pub fn replace(&self, index: usize, record: Value) -> Result<bool> {
        self.form.apply_array_op(&self.path, ArrayOp::Replace(index, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn numbers() -> (FieldArrayManager, FieldPath, Vec<Value>) {
        let items = vec![json!({"number": "1"}), json!({"number": "2"})];
        (FieldArrayManager::new(), FieldPath::parse("phNumbers"), items)
    }

    #[test]
    fn keys_are_stable_across_reads() {
        let (mut manager, path, items) = numbers();
        let first = manager.keys(&path, items.len()).to_vec();
        let second = manager.keys(&path, items.len()).to_vec();
        assert_eq!(first, second);
        assert_ne!(first[0], first[1]);
    }

    #[test]
    fn append_then_remove_first_preserves_identity() {
        let mut manager = FieldArrayManager::new();
        let path = FieldPath::parse("phNumbers");
        let mut items = vec![json!({"number": "1"})];

        manager.apply(&path, &mut items, ArrayOp::Append(json!({"number": "2"})));
        let before = manager.items(&path, &items);
        assert_eq!(before.len(), 2);

        let change = manager.apply(&path, &mut items, ArrayOp::Remove(0)).unwrap();
        assert_eq!(change.mapping, vec![None, Some(0)]);

        let after = manager.items(&path, &items);
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].key, before[1].key);
        assert_eq!(after[0].value, json!({"number": "2"}));
    }

    #[test]
    fn remove_keeps_earlier_keys_and_shifts_later() {
        let mut manager = FieldArrayManager::new();
        let path = FieldPath::parse("list");
        let mut items = vec![json!(0), json!(1), json!(2), json!(3)];
        let before = manager.keys(&path, 4).to_vec();

        manager.apply(&path, &mut items, ArrayOp::Remove(1)).unwrap();
        let after = manager.keys(&path, 3).to_vec();
        assert_eq!(after, vec![before[0], before[2], before[3]]);
    }

    #[test]
    fn move_and_swap_carry_keys() {
        let mut manager = FieldArrayManager::new();
        let path = FieldPath::parse("list");
        let mut items = vec![json!("a"), json!("b"), json!("c")];
        let keys = manager.keys(&path, 3).to_vec();

        let change = manager
            .apply(&path, &mut items, ArrayOp::Move { from: 0, to: 2 })
            .unwrap();
        assert_eq!(items, vec![json!("b"), json!("c"), json!("a")]);
        assert_eq!(change.mapping, vec![Some(2), Some(0), Some(1)]);
        assert_eq!(manager.keys(&path, 3), &[keys[1], keys[2], keys[0]]);

        manager.apply(&path, &mut items, ArrayOp::Swap(0, 2)).unwrap();
        assert_eq!(items, vec![json!("a"), json!("c"), json!("b")]);
        assert_eq!(manager.keys(&path, 3), &[keys[0], keys[2], keys[1]]);
    }

    #[test]
    fn replace_issues_a_new_key() {
        let (mut manager, path, mut items) = numbers();
        let keys = manager.keys(&path, 2).to_vec();

        let change = manager
            .apply(&path, &mut items, ArrayOp::Replace(1, json!({"number": "9"})))
            .unwrap();
        assert!(change.is_identity());
        assert_eq!(change.replaced, Some(1));

        let after = manager.keys(&path, 2).to_vec();
        assert_eq!(after[0], keys[0]);
        assert_ne!(after[1], keys[1]);
    }

    #[test]
    fn insert_clamps_and_prepend_shifts() {
        let (mut manager, path, mut items) = numbers();
        let change = manager
            .apply(&path, &mut items, ArrayOp::Insert(10, json!({"number": "3"})))
            .unwrap();
        assert_eq!(change.mapping, vec![Some(0), Some(1)]);
        assert_eq!(items.len(), 3);

        let change = manager
            .apply(&path, &mut items, ArrayOp::Prepend(json!({"number": "0"})))
            .unwrap();
        assert_eq!(change.mapping, vec![Some(1), Some(2), Some(3)]);
        assert_eq!(items[0], json!({"number": "0"}));
    }

    #[test]
    fn out_of_range_is_a_no_op() {
        let (mut manager, path, mut items) = numbers();
        let keys = manager.keys(&path, 2).to_vec();
        assert!(manager.apply(&path, &mut items, ArrayOp::Remove(5)).is_none());
        assert!(manager
            .apply(&path, &mut items, ArrayOp::Move { from: 0, to: 2 })
            .is_none());
        assert_eq!(items.len(), 2);
        assert_eq!(manager.keys(&path, 2), keys.as_slice());
    }

    #[test]
    fn nested_keys_follow_their_item() {
        let mut manager = FieldArrayManager::new();
        let outer = FieldPath::parse("groups");
        let mut items = vec![json!({"tags": ["x"]}), json!({"tags": ["y", "z"]})];
        manager.keys(&outer, 2);
        let nested = manager.keys(&"groups.1.tags".into(), 2).to_vec();

        manager.apply(&outer, &mut items, ArrayOp::Remove(0)).unwrap();
        assert_eq!(manager.keys(&"groups.0.tags".into(), 2), nested.as_slice());
    }

    #[test]
    fn clear_regenerates() {
        let (mut manager, path, _) = numbers();
        let before = manager.keys(&path, 2).to_vec();
        manager.clear();
        let after = manager.keys(&path, 2).to_vec();
        assert_ne!(before, after);
    }
}
