//! Organization Node Model
//!
//! An `OrgNode` is one entity of the strict three-level organization tree:
//!
//! ```text
//! Parent (depth 1) -> Subsidiary (depth 2) -> Branch (depth 3)
//! ```
//!
//! The structural fields (`path`, `parent_id`, `org_type`) are private. They
//! are derived from the materialized path and can only change through the
//! crate's hierarchy service; callers read them through accessors. The
//! descriptive payload lives in the public `attributes` field.
//!
//! # Persistence
//!
//! Stores exchange rows as [`OrgNodeRecord`] values and turn them back into
//! nodes with [`OrgNode::restore`], which re-checks every structural
//! invariant that can be verified on a single row.

use crate::models::path::{NodePath, PathError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Single-row consistency errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid path: {0}")]
    Path(#[from] PathError),

    #[error("Unknown organization type: {0}")]
    UnknownOrgType(String),

    #[error("Depth {depth} is outside the supported range 1..=3")]
    DepthOutOfRange { depth: usize },

    #[error("Node '{id}' has type '{org_type}' but depth {depth}")]
    TypeDepthMismatch {
        id: String,
        org_type: OrgType,
        depth: usize,
    },

    #[error("Node '{id}' path '{path}' does not end with its own id")]
    PathLeafMismatch { id: String, path: String },

    #[error("Node '{id}' parent reference {parent_id:?} disagrees with path '{path}'")]
    ParentMismatch {
        id: String,
        parent_id: Option<String>,
        path: String,
    },
}

/// Level of an organization in the tree
///
/// Strictly derived from depth; never assigned independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgType {
    Parent,
    Subsidiary,
    Branch,
}

impl OrgType {
    /// Type for a path of the given depth
    pub fn from_depth(depth: usize) -> Result<Self, ValidationError> {
        match depth {
            1 => Ok(Self::Parent),
            2 => Ok(Self::Subsidiary),
            3 => Ok(Self::Branch),
            _ => Err(ValidationError::DepthOutOfRange { depth }),
        }
    }

    /// Depth implied by this type
    pub fn depth(self) -> usize {
        match self {
            Self::Parent => 1,
            Self::Subsidiary => 2,
            Self::Branch => 3,
        }
    }

    /// Type a direct child of this type receives (`None` for Branch)
    pub fn child_type(self) -> Option<Self> {
        match self {
            Self::Parent => Some(Self::Subsidiary),
            Self::Subsidiary => Some(Self::Branch),
            Self::Branch => None,
        }
    }

    pub fn can_have_children(self) -> bool {
        self.child_type().is_some()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::Subsidiary => "subsidiary",
            Self::Branch => "branch",
        }
    }
}

impl fmt::Display for OrgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrgType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parent" => Ok(Self::Parent),
            "subsidiary" => Ok(Self::Subsidiary),
            "branch" => Ok(Self::Branch),
            other => Err(ValidationError::UnknownOrgType(other.to_string())),
        }
    }
}

/// Postal address of an organization (opaque to the hierarchy)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// Descriptive payload of an organization
///
/// Nothing here participates in hierarchy invariants. `industry_id` is the
/// one inheritable attribute: a child created without one receives its
/// parent's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgAttributes {
    pub name: String,

    /// Reference into the industry catalogue (reference data)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,

    /// Free-form CRM fields (phone, website, tax id, ...)
    #[serde(default = "empty_object")]
    pub properties: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl OrgAttributes {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            industry_id: None,
            address: None,
            properties: empty_object(),
        }
    }

    pub fn with_industry(mut self, industry_id: impl Into<String>) -> Self {
        self.industry_id = Some(industry_id.into());
        self
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }
}

impl Default for OrgAttributes {
    fn default() -> Self {
        Self::named("")
    }
}

/// Flat persisted form of an organization row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgNodeRecord {
    pub id: String,
    pub parent_id: Option<String>,
    pub org_type: OrgType,
    pub path: NodePath,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub attributes: OrgAttributes,
}

/// An organization in the hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "OrgNodeRecord", into = "OrgNodeRecord")]
pub struct OrgNode {
    id: String,
    parent_id: Option<String>,
    org_type: OrgType,
    path: NodePath,
    version: i64,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,

    /// Descriptive payload (name, industry, address, custom fields)
    pub attributes: OrgAttributes,
}

impl OrgNode {
    /// Create a root (Parent) organization with version 1
    pub(crate) fn new_root(
        id: String,
        attributes: OrgAttributes,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let path = NodePath::root(&id)?;
        Ok(Self {
            id,
            parent_id: None,
            org_type: OrgType::Parent,
            path,
            version: 1,
            created_at: now,
            modified_at: now,
            attributes,
        })
    }

    /// Create a child of `parent`, deriving path and type from the parent
    /// snapshot
    pub(crate) fn new_child(
        id: String,
        parent: &OrgNode,
        attributes: OrgAttributes,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let path = parent.path.append(&id)?;
        let org_type = OrgType::from_depth(path.depth())?;
        Ok(Self {
            id,
            parent_id: Some(parent.id.clone()),
            org_type,
            path,
            version: 1,
            created_at: now,
            modified_at: now,
            attributes,
        })
    }

    /// Rebuild a node from a stored row, checking single-row invariants
    pub fn restore(record: OrgNodeRecord) -> Result<Self, ValidationError> {
        let node = Self {
            id: record.id,
            parent_id: record.parent_id,
            org_type: record.org_type,
            path: record.path,
            version: record.version,
            created_at: record.created_at,
            modified_at: record.modified_at,
            attributes: record.attributes,
        };
        node.validate()?;
        Ok(node)
    }

    /// Check that id, parent reference, type and path agree with each other
    pub fn validate(&self) -> Result<(), ValidationError> {
        let depth = self.path.depth();
        let expected_type = OrgType::from_depth(depth)?;
        if expected_type != self.org_type {
            return Err(ValidationError::TypeDepthMismatch {
                id: self.id.clone(),
                org_type: self.org_type,
                depth,
            });
        }
        if self.path.leaf() != self.id {
            return Err(ValidationError::PathLeafMismatch {
                id: self.id.clone(),
                path: self.path.encode(),
            });
        }
        if self.path.parent_id() != self.parent_id.as_deref() {
            return Err(ValidationError::ParentMismatch {
                id: self.id.clone(),
                parent_id: self.parent_id.clone(),
                path: self.path.encode(),
            });
        }
        Ok(())
    }

    /// Re-home this node at `new_path`, re-deriving parent and type and
    /// bumping the version
    pub(crate) fn relocate(
        &mut self,
        new_path: NodePath,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        if new_path.leaf() != self.id {
            return Err(ValidationError::PathLeafMismatch {
                id: self.id.clone(),
                path: new_path.encode(),
            });
        }
        self.org_type = OrgType::from_depth(new_path.depth())?;
        self.parent_id = new_path.parent_id().map(str::to_string);
        self.path = new_path;
        self.touch(now);
        Ok(())
    }

    /// Copy of this node after its ancestor `old_prefix` moved to
    /// `new_prefix`
    ///
    /// Stores call this while applying [`crate::db::WriteOp::RewritePrefix`].
    pub fn with_rewritten_prefix(
        &self,
        old_prefix: &NodePath,
        new_prefix: &NodePath,
        now: DateTime<Utc>,
    ) -> Result<OrgNode, ValidationError> {
        let new_path = self.path.replace_prefix(old_prefix, new_prefix)?;
        let mut rewritten = self.clone();
        rewritten.relocate(new_path, now)?;
        Ok(rewritten)
    }

    /// Replace the descriptive payload and bump the version
    pub(crate) fn replace_attributes(&mut self, attributes: OrgAttributes, now: DateTime<Utc>) {
        self.attributes = attributes;
        self.touch(now);
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.modified_at = now;
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn org_type(&self) -> OrgType {
        self.org_type
    }

    pub fn path(&self) -> &NodePath {
        &self.path
    }

    pub fn depth(&self) -> usize {
        self.path.depth()
    }

    /// Id of the Parent organization at the top of this node's tree
    pub fn root_id(&self) -> &str {
        self.path.root_id()
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    pub fn name(&self) -> &str {
        &self.attributes.name
    }

    /// Flatten into the persisted row form
    pub fn to_record(&self) -> OrgNodeRecord {
        self.clone().into()
    }
}

impl TryFrom<OrgNodeRecord> for OrgNode {
    type Error = ValidationError;

    fn try_from(record: OrgNodeRecord) -> Result<Self, Self::Error> {
        Self::restore(record)
    }
}

impl From<OrgNode> for OrgNodeRecord {
    fn from(node: OrgNode) -> Self {
        Self {
            id: node.id,
            parent_id: node.parent_id,
            org_type: node.org_type,
            path: node.path,
            version: node.version,
            created_at: node.created_at,
            modified_at: node.modified_at,
            attributes: node.attributes,
        }
    }
}

/// Parameters for creating an organization
#[derive(Debug, Clone, Default)]
pub struct CreateOrgParams {
    /// Optional caller-chosen id; a UUID v4 is generated when absent
    pub id: Option<String>,
    /// Parent organization; `None` creates a new root (Parent)
    pub parent_id: Option<String>,
    pub attributes: OrgAttributes,
}

impl CreateOrgParams {
    pub fn root(attributes: OrgAttributes) -> Self {
        Self {
            id: None,
            parent_id: None,
            attributes,
        }
    }

    pub fn child_of(parent_id: impl Into<String>, attributes: OrgAttributes) -> Self {
        Self {
            id: None,
            parent_id: Some(parent_id.into()),
            attributes,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// A node together with its whole subtree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyView {
    pub node: OrgNode,
    /// Strict descendants, shallowest first
    pub descendants: Vec<OrgNode>,
    /// `descendants.len() + 1`
    pub total_count: usize,
}

impl HierarchyView {
    pub fn new(node: OrgNode, descendants: Vec<OrgNode>) -> Self {
        let total_count = descendants.len() + 1;
        Self {
            node,
            descendants,
            total_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn root(id: &str) -> OrgNode {
        OrgNode::new_root(id.to_string(), OrgAttributes::named(id), Utc::now()).unwrap()
    }

    #[test]
    fn test_type_derivation_chain() {
        assert_eq!(OrgType::from_depth(1).unwrap(), OrgType::Parent);
        assert_eq!(OrgType::from_depth(2).unwrap(), OrgType::Subsidiary);
        assert_eq!(OrgType::from_depth(3).unwrap(), OrgType::Branch);
        assert!(OrgType::from_depth(0).is_err());
        assert!(OrgType::from_depth(4).is_err());

        assert_eq!(OrgType::Parent.child_type(), Some(OrgType::Subsidiary));
        assert_eq!(OrgType::Subsidiary.child_type(), Some(OrgType::Branch));
        assert_eq!(OrgType::Branch.child_type(), None);
        assert!(!OrgType::Branch.can_have_children());
    }

    #[test]
    fn test_org_type_string_round_trip() {
        for t in [OrgType::Parent, OrgType::Subsidiary, OrgType::Branch] {
            assert_eq!(t.as_str().parse::<OrgType>().unwrap(), t);
        }
        assert!("division".parse::<OrgType>().is_err());
    }

    #[test]
    fn test_new_child_derives_structure() {
        let a = root("a");
        let b = OrgNode::new_child("b".to_string(), &a, OrgAttributes::named("B"), Utc::now())
            .unwrap();
        let c = OrgNode::new_child("c".to_string(), &b, OrgAttributes::named("C"), Utc::now())
            .unwrap();

        assert_eq!(b.org_type(), OrgType::Subsidiary);
        assert_eq!(b.parent_id(), Some("a"));
        assert_eq!(c.org_type(), OrgType::Branch);
        assert_eq!(c.path().encode(), "a.b.c");
        assert_eq!(c.root_id(), "a");

        let too_deep =
            OrgNode::new_child("d".to_string(), &c, OrgAttributes::named("D"), Utc::now());
        assert_eq!(
            too_deep.unwrap_err(),
            ValidationError::DepthOutOfRange { depth: 4 }
        );
    }

    #[test]
    fn test_restore_rejects_inconsistent_rows() {
        let mut record = root("a").to_record();
        record.org_type = OrgType::Branch;
        assert!(matches!(
            OrgNode::restore(record),
            Err(ValidationError::TypeDepthMismatch { .. })
        ));

        let mut record = root("a").to_record();
        record.parent_id = Some("ghost".to_string());
        assert!(matches!(
            OrgNode::restore(record),
            Err(ValidationError::ParentMismatch { .. })
        ));

        let mut record = root("a").to_record();
        record.id = "b".to_string();
        assert!(matches!(
            OrgNode::restore(record),
            Err(ValidationError::PathLeafMismatch { .. })
        ));
    }

    #[test]
    fn test_relocate_rederives_type_and_bumps_version() {
        let a = root("a");
        let mut b =
            OrgNode::new_child("b".to_string(), &a, OrgAttributes::named("B"), Utc::now())
                .unwrap();

        b.relocate(NodePath::root("b").unwrap(), Utc::now()).unwrap();

        assert_eq!(b.org_type(), OrgType::Parent);
        assert_eq!(b.parent_id(), None);
        assert_eq!(b.version(), 2);
        assert!(b.validate().is_ok());
    }

    #[test]
    fn test_serde_validates_on_deserialize() {
        let node = root("acme");
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["orgType"], "parent");
        assert_eq!(json["path"], "acme");
        assert_eq!(json["attributes"]["name"], "acme");

        let back: OrgNode = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(back, node);

        let mut broken = json;
        broken["orgType"] = json!("branch");
        assert!(serde_json::from_value::<OrgNode>(broken).is_err());
    }

    #[test]
    fn test_attributes_default_properties_object() {
        let attrs: OrgAttributes = serde_json::from_value(json!({"name": "Acme"})).unwrap();
        assert_eq!(attrs.properties, json!({}));
        assert!(attrs.industry_id.is_none());
    }

    #[test]
    fn test_hierarchy_view_total_count() {
        let a = root("a");
        let view = HierarchyView::new(a, vec![]);
        assert_eq!(view.total_count, 1);
    }
}
