//! Dotted-path addressing of nested fields inside JSON documents.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An ordered list of key segments addressing a nested field, e.g. the
/// parts of `"custom.string_foo"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldPath {
    pub parts: Vec<String>,
}

impl FieldPath {
    pub fn new(parts: Vec<String>) -> Self {
        Self { parts }
    }

    /// Split a dotted path on `.`. There is no escaping; an empty input
    /// yields a single empty segment.
    pub fn parse(dotted: &str) -> Self {
        Self {
            parts: dotted.split('.').map(str::to_string).collect(),
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parts.join("."))
    }
}
