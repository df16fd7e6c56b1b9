//! The editable content tree and its path-based addressing scheme.
//!
//! Content is addressed by dot-delimited path strings ("hero.title",
//! "about.image"). Paths are created on first write; there is no fixed
//! schema. `ContentPath` validates path shape so callers never index the
//! tree with arbitrary strings.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Error from content path validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("content path is empty")]
    Empty,
    #[error("content path has an empty segment: {0:?}")]
    EmptySegment(String),
    #[error("content path has an invalid character in {0:?}")]
    InvalidCharacter(String),
}

/// A validated dot-delimited content path.
///
/// Segments are non-empty and limited to `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentPath(String);

impl ContentPath {
    /// Parse and validate a path string.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::Empty);
        }
        for segment in raw.split('.') {
            if segment.is_empty() {
                return Err(PathError::EmptySegment(raw.to_string()));
            }
            if !segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(PathError::InvalidCharacter(raw.to_string()));
            }
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the path's segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

impl fmt::Display for ContentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ContentPath::parse(&value)
    }
}

impl From<ContentPath> for String {
    fn from(path: ContentPath) -> Self {
        path.0
    }
}

/// The path-keyed mapping of editable site values.
///
/// Values are arbitrary JSON: text strings, image URLs, structured
/// background descriptors. Writes are last-write-wins at path granularity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentTree {
    entries: HashMap<ContentPath, Value>,
}

impl ContentTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &ContentPath) -> Option<&Value> {
        self.entries.get(path)
    }

    /// Set a value, replacing any previous value at the path.
    pub fn set(&mut self, path: ContentPath, value: Value) {
        self.entries.insert(path, value);
    }

    pub fn remove(&mut self, path: &ContentPath) -> Option<Value> {
        self.entries.remove(path)
    }

    /// Replace this tree with a durable snapshot, keeping the current
    /// values at `keep` paths on top. Refreshes from the store without
    /// clobbering unsaved local edits.
    pub fn merge_snapshot(&mut self, snapshot: ContentTree, keep: &HashSet<ContentPath>) {
        let mut merged = snapshot;
        for path in keep {
            if let Some(value) = self.entries.get(path) {
                merged.entries.insert(path.clone(), value.clone());
            }
        }
        *self = merged;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ContentPath, &Value)> {
        self.entries.iter()
    }
}
