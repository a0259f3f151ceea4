//! Materialized Path Codec
//!
//! Every organization stores its full ancestry as an ordered list of ids,
//! root first and ending with its own id. This module owns all arithmetic
//! over those lists:
//!
//! - **depth**: number of segments (1 = Parent, 2 = Subsidiary, 3 = Branch)
//! - **append**: build a child's path from its parent's path
//! - **prefix tests**: strict descendant and ancestor-or-self checks
//! - **prefix replacement**: rewrite a descendant's path after a move
//!
//! # Storage Encoding
//!
//! Paths are persisted as dotted strings (`"acme.acme-eu.acme-eu-berlin"`).
//! Segments may never contain the separator, so every strict descendant of
//! `p` encodes to a string in the half-open range `[p + ".", p + "/")`
//! (`'/'` is the byte immediately after `'.'`). Stores use that range for
//! index-backed subtree scans.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Separator used by the dotted storage encoding
pub const PATH_SEPARATOR: char = '.';

/// Exclusive upper bound character for descendant range scans
const RANGE_END: char = '/';

/// Deepest allowed level (Branch)
pub const MAX_DEPTH: usize = 3;

/// Errors raised for malformed path values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// A path must contain at least the node's own id
    #[error("Path must contain at least one segment")]
    Empty,

    /// Segment is empty, too long, or contains forbidden characters
    #[error("Invalid path segment '{segment}'")]
    InvalidSegment { segment: String },

    /// `replace_prefix` called with a prefix the path does not start with
    #[error("Path '{path}' does not start with prefix '{prefix}'")]
    PrefixMismatch { path: String, prefix: String },
}

fn segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("segment pattern is a valid regex")
    })
}

/// Check whether an id can be used as a path segment
///
/// Valid ids are 1-64 characters of `[A-Za-z0-9_-]`. UUIDs qualify.
pub fn is_valid_segment(segment: &str) -> bool {
    segment_pattern().is_match(segment)
}

/// Root-first sequence of organization ids
///
/// A `NodePath` is never empty and every segment is a valid id, so the
/// accessors below (`leaf`, `root_id`) cannot fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodePath(Vec<String>);

impl NodePath {
    /// Path of a root organization: `[id]`
    pub fn root(id: &str) -> Result<Self, PathError> {
        Self::from_segments(vec![id.to_string()])
    }

    /// Build a path from already-split segments
    pub fn from_segments(segments: Vec<String>) -> Result<Self, PathError> {
        if segments.is_empty() {
            return Err(PathError::Empty);
        }
        if let Some(bad) = segments.iter().find(|s| !is_valid_segment(s)) {
            return Err(PathError::InvalidSegment {
                segment: bad.clone(),
            });
        }
        Ok(Self(segments))
    }

    /// Parse the dotted storage form
    pub fn parse(encoded: &str) -> Result<Self, PathError> {
        if encoded.is_empty() {
            return Err(PathError::Empty);
        }
        Self::from_segments(encoded.split(PATH_SEPARATOR).map(str::to_string).collect())
    }

    /// Dotted storage form
    pub fn encode(&self) -> String {
        self.0.join(".")
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Segment count (1-based level in the tree)
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// The id of the node this path belongs to
    pub fn leaf(&self) -> &str {
        &self.0[self.0.len() - 1]
    }

    /// The id of the tree root
    pub fn root_id(&self) -> &str {
        &self.0[0]
    }

    /// Ids of every ancestor, root first (excludes the leaf)
    pub fn ancestor_ids(&self) -> &[String] {
        &self.0[..self.0.len() - 1]
    }

    /// Id of the direct parent, `None` for a root path
    pub fn parent_id(&self) -> Option<&str> {
        self.ancestor_ids().last().map(String::as_str)
    }

    /// Path of the direct parent, `None` for a root path
    pub fn parent(&self) -> Option<NodePath> {
        if self.0.len() > 1 {
            Some(Self(self.ancestor_ids().to_vec()))
        } else {
            None
        }
    }

    /// `path + id`
    pub fn append(&self, id: &str) -> Result<NodePath, PathError> {
        if !is_valid_segment(id) {
            return Err(PathError::InvalidSegment {
                segment: id.to_string(),
            });
        }
        let mut segments = self.0.clone();
        segments.push(id.to_string());
        Ok(Self(segments))
    }

    /// Strict descendant test: `other` starts with `self` and is longer
    pub fn is_prefix_of(&self, other: &NodePath) -> bool {
        other.0.len() > self.0.len() && other.0.starts_with(&self.0)
    }

    /// Ancestor-or-self test: `other` starts with `self`
    pub fn is_ancestor_or_self(&self, other: &NodePath) -> bool {
        other.0.starts_with(&self.0)
    }

    /// Swap `old_prefix` for `new_prefix` at the front of this path
    ///
    /// Used when a subtree moves: a descendant `[a, b, c]` of `[a, b]` moved
    /// to `[x, b]` becomes `[x, b, c]`.
    pub fn replace_prefix(
        &self,
        old_prefix: &NodePath,
        new_prefix: &NodePath,
    ) -> Result<NodePath, PathError> {
        if !old_prefix.is_ancestor_or_self(self) {
            return Err(PathError::PrefixMismatch {
                path: self.encode(),
                prefix: old_prefix.encode(),
            });
        }
        let mut segments = new_prefix.0.clone();
        segments.extend_from_slice(&self.0[old_prefix.0.len()..]);
        Ok(Self(segments))
    }

    /// Half-open range `[lower, upper)` of encoded paths covering every
    /// strict descendant of this path
    pub fn descendant_range(&self) -> (String, String) {
        let encoded = self.encode();
        (
            format!("{}{}", encoded, PATH_SEPARATOR),
            format!("{}{}", encoded, RANGE_END),
        )
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl TryFrom<String> for NodePath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NodePath> for String {
    fn from(path: NodePath) -> Self {
        path.encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(encoded: &str) -> NodePath {
        NodePath::parse(encoded).unwrap()
    }

    #[test]
    fn test_depth_and_accessors() {
        let p = path("a.b.c");
        assert_eq!(p.depth(), 3);
        assert_eq!(p.leaf(), "c");
        assert_eq!(p.root_id(), "a");
        assert_eq!(p.parent_id(), Some("b"));
        assert_eq!(p.parent(), Some(path("a.b")));
        assert_eq!(p.ancestor_ids(), &["a".to_string(), "b".to_string()]);

        let root = NodePath::root("a").unwrap();
        assert_eq!(root.depth(), 1);
        assert_eq!(root.parent_id(), None);
        assert!(root.parent().is_none());
    }

    #[test]
    fn test_append() {
        let child = path("a.b").append("c").unwrap();
        assert_eq!(child, path("a.b.c"));
        assert_eq!(child.encode(), "a.b.c");
    }

    #[test]
    fn test_append_rejects_separator_in_id() {
        let err = path("a").append("b.c").unwrap_err();
        assert_eq!(
            err,
            PathError::InvalidSegment {
                segment: "b.c".to_string()
            }
        );
    }

    #[test]
    fn test_parse_rejects_malformed_input() {
        assert_eq!(NodePath::parse(""), Err(PathError::Empty));
        assert!(NodePath::parse("a..b").is_err());
        assert!(NodePath::parse(".a").is_err());
        assert!(NodePath::parse("a b").is_err());
        assert_eq!(NodePath::from_segments(vec![]), Err(PathError::Empty));
    }

    #[test]
    fn test_prefix_tests() {
        let a = path("a");
        let ab = path("a.b");
        let abc = path("a.b.c");
        let ax = path("ax");

        assert!(a.is_prefix_of(&ab));
        assert!(a.is_prefix_of(&abc));
        assert!(!ab.is_prefix_of(&ab), "strict test excludes self");
        assert!(ab.is_ancestor_or_self(&ab));
        assert!(!abc.is_prefix_of(&ab));
        // Segment-wise comparison, not string-wise
        assert!(!a.is_prefix_of(&ax));
    }

    #[test]
    fn test_replace_prefix() {
        let moved = path("a.b.c")
            .replace_prefix(&path("a.b"), &path("b"))
            .unwrap();
        assert_eq!(moved, path("b.c"));

        let moved = path("a.b.c")
            .replace_prefix(&path("a.b"), &path("x.b"))
            .unwrap();
        assert_eq!(moved, path("x.b.c"));
        assert_eq!(moved.depth(), 3);
    }

    #[test]
    fn test_replace_prefix_mismatch() {
        let err = path("a.b.c")
            .replace_prefix(&path("x"), &path("y"))
            .unwrap_err();
        assert!(matches!(err, PathError::PrefixMismatch { .. }));
    }

    #[test]
    fn test_descendant_range_bounds_only_descendants() {
        let (lower, upper) = path("a").descendant_range();
        let inside = ["a.b", "a.b.c", "a.z-9"];
        let outside = ["a", "ab", "a-b", "b.a", "a/"];

        for p in inside {
            assert!(p >= lower.as_str() && p < upper.as_str(), "{p} should be in range");
        }
        for p in outside {
            assert!(
                !(p >= lower.as_str() && p < upper.as_str()),
                "{p} should be out of range"
            );
        }
    }

    #[test]
    fn test_serde_uses_dotted_form() {
        let json = serde_json::to_string(&path("a.b")).unwrap();
        assert_eq!(json, "\"a.b\"");

        let parsed: NodePath = serde_json::from_str("\"a.b.c\"").unwrap();
        assert_eq!(parsed.depth(), 3);
        assert!(serde_json::from_str::<NodePath>("\"\"").is_err());
    }
}
