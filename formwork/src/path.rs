//! Path addressing into the nested value tree.
//!
//! A [`FieldPath`] is a sequence of segments, each either an object key or a
//! sequence index. Paths are parsed once, at the API boundary, from the dotted
//! notation used by callers (`social.twitter`, `phNumbers.2.number`) or the
//! bracket notation (`phNumbers[2].number`). Everything past the boundary works
//! on segments.
//!
//! The free functions [`lookup`], [`assign`] and [`remove`] are the only code
//! that walks a [`serde_json::Value`] by path.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// One step of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => f.write_str(key),
            PathSegment::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Result of moving a path through an array re-indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reindexed {
    /// The path does not live inside an item of the re-indexed array.
    Unaffected,
    /// The item the path lives in moved; this is the path at its new position.
    Moved(FieldPath),
    /// The item the path lives in no longer exists.
    Dropped,
}

/// An addressable location within a value tree.
///
/// The empty path addresses the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    /// The root path (addresses the whole tree).
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_segments(segments: impl Into<Vec<PathSegment>>) -> Self {
        Self(segments.into())
    }

    /// Parse dotted or bracket notation. Purely numeric segments become indices.
    pub fn parse(text: &str) -> Self {
        let mut segments = Vec::new();
        for part in text.split('.') {
            let mut rest = part;
            // `name[1][2]` splits into a key followed by indices
            while let Some(open) = rest.find('[') {
                let head = &rest[..open];
                if !head.is_empty() {
                    segments.push(segment_from(head));
                }
                match rest[open..].find(']') {
                    Some(close) => {
                        let inner = &rest[open + 1..open + close];
                        if !inner.is_empty() {
                            segments.push(segment_from(inner));
                        }
                        rest = &rest[open + close + 1..];
                    }
                    None => {
                        // Unbalanced bracket; keep the remainder verbatim as a key
                        segments.push(PathSegment::Key(rest[open..].to_string()));
                        rest = "";
                    }
                }
            }
            if !rest.is_empty() {
                segments.push(segment_from(rest));
            }
        }
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn parent(&self) -> Option<FieldPath> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.0.last()
    }

    pub fn child(&self, segment: PathSegment) -> FieldPath {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }

    pub fn key(&self, key: impl Into<String>) -> FieldPath {
        self.child(PathSegment::Key(key.into()))
    }

    pub fn index(&self, index: usize) -> FieldPath {
        self.child(PathSegment::Index(index))
    }

    /// True if `self` is `other` or lies beneath it.
    pub fn starts_with(&self, other: &FieldPath) -> bool {
        self.0.starts_with(&other.0)
    }

    /// True if `self` strictly contains `other`.
    pub fn is_ancestor_of(&self, other: &FieldPath) -> bool {
        other.0.len() > self.0.len() && other.starts_with(self)
    }

    /// Same path, ancestor or descendant. Writes to one are visible at the other.
    pub fn is_related(&self, other: &FieldPath) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    /// Follow an item of the array at `array` through an index mapping.
    ///
    /// `mapping[old]` is the new index of the item previously at `old`, or
    /// `None` when that item was removed.
    pub fn reindex(&self, array: &FieldPath, mapping: &[Option<usize>]) -> Reindexed {
        if !array.is_ancestor_of(self) {
            return Reindexed::Unaffected;
        }
        let PathSegment::Index(old) = self.0[array.len()] else {
            return Reindexed::Unaffected;
        };
        match mapping.get(old) {
            Some(Some(new)) if *new == old => Reindexed::Unaffected,
            Some(Some(new)) => {
                let mut segments = self.0.clone();
                segments[array.len()] = PathSegment::Index(*new);
                Reindexed::Moved(Self(segments))
            }
            Some(None) => Reindexed::Dropped,
            // Paths past the end of the old array address nothing
            None => Reindexed::Dropped,
        }
    }
}

fn segment_from(text: &str) -> PathSegment {
    match text.parse::<usize>() {
        Ok(index) if !text.starts_with('+') => PathSegment::Index(index),
        _ => PathSegment::Key(text.to_string()),
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(FieldPath::parse(s))
    }
}

impl From<&str> for FieldPath {
    fn from(text: &str) -> Self {
        FieldPath::parse(text)
    }
}

impl From<String> for FieldPath {
    fn from(text: String) -> Self {
        FieldPath::parse(&text)
    }
}

impl From<&String> for FieldPath {
    fn from(text: &String) -> Self {
        FieldPath::parse(text)
    }
}

impl From<&FieldPath> for FieldPath {
    fn from(path: &FieldPath) -> Self {
        path.clone()
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(FieldPath::parse(&text))
    }
}

/// Borrow the value at `path`, if present.
pub fn lookup<'a>(root: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.segments() {
        current = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get(key)?,
            (PathSegment::Index(index), Value::Array(items)) => items.get(*index)?,
            // Objects with numeric keys are addressed with index segments too
            (PathSegment::Index(index), Value::Object(map)) => map.get(&index.to_string())?,
            _ => return None,
        };
    }
    Some(current)
}

pub fn lookup_mut<'a>(root: &'a mut Value, path: &FieldPath) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in path.segments() {
        current = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get_mut(key)?,
            (PathSegment::Index(index), Value::Array(items)) => items.get_mut(*index)?,
            (PathSegment::Index(index), Value::Object(map)) => map.get_mut(&index.to_string())?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write `value` at `path`, creating intermediate containers as needed.
///
/// Key segments create objects, index segments create arrays (padded with
/// nulls). A scalar standing where a container is needed is replaced.
pub fn assign(root: &mut Value, path: &FieldPath, value: Value) {
    let Some((last, parents)) = path.segments().split_last() else {
        *root = value;
        return;
    };

    let mut current = root;
    for (i, segment) in parents.iter().enumerate() {
        let next = &path.segments()[i + 1];
        current = descend_or_create(current, segment, next);
    }

    match last {
        PathSegment::Key(key) => {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            if let Value::Object(map) = current {
                map.insert(key.clone(), value);
            }
        }
        PathSegment::Index(index) => {
            if let Value::Object(map) = current {
                map.insert(index.to_string(), value);
                return;
            }
            if !current.is_array() {
                *current = Value::Array(Vec::new());
            }
            if let Value::Array(items) = current {
                if *index >= items.len() {
                    items.resize(*index + 1, Value::Null);
                }
                items[*index] = value;
            }
        }
    }
}

fn descend_or_create<'a>(
    current: &'a mut Value,
    segment: &PathSegment,
    next: &PathSegment,
) -> &'a mut Value {
    let empty_container = || match next {
        PathSegment::Key(_) => Value::Object(Map::new()),
        PathSegment::Index(_) => Value::Array(Vec::new()),
    };

    match segment {
        PathSegment::Index(index) if !current.is_object() => {
            if !current.is_array() {
                *current = Value::Array(Vec::new());
            }
            let Value::Array(items) = current else {
                unreachable!("replaced with an array above")
            };
            if *index >= items.len() {
                items.resize(*index + 1, Value::Null);
            }
            let slot = &mut items[*index];
            if !slot.is_object() && !slot.is_array() {
                *slot = empty_container();
            }
            slot
        }
        _ => {
            let key = segment.to_string();
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            let Value::Object(map) = current else {
                unreachable!("replaced with an object above")
            };
            let slot = map.entry(key).or_insert_with(empty_container);
            if !slot.is_object() && !slot.is_array() {
                *slot = empty_container();
            }
            slot
        }
    }
}

/// Remove and return the value at `path`. Array items are removed with
/// shifting; removing the root replaces it with null.
pub fn remove(root: &mut Value, path: &FieldPath) -> Option<Value> {
    let Some((last, _)) = path.segments().split_last() else {
        return Some(std::mem::take(root));
    };
    let parent = lookup_mut(root, &path.parent()?)?;
    match (last, parent) {
        (PathSegment::Key(key), Value::Object(map)) => map.remove(key),
        (PathSegment::Index(index), Value::Array(items)) if *index < items.len() => {
            Some(items.remove(*index))
        }
        (PathSegment::Index(index), Value::Object(map)) => map.remove(&index.to_string()),
        _ => None,
    }
}
