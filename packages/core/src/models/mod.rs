//! Data Models
//!
//! - [`path`] - materialized path codec (`NodePath`)
//! - [`org_node`] - organizations, their derived type, and payload

pub mod org_node;
pub mod path;

pub use org_node::{
    Address, CreateOrgParams, HierarchyView, OrgAttributes, OrgNode, OrgNodeRecord, OrgType,
    ValidationError,
};
pub use path::{is_valid_segment, NodePath, PathError, MAX_DEPTH, PATH_SEPARATOR};
