//! Domain Events for the Organization Hierarchy
//!
//! Events are emitted by `HierarchyService` after a transaction commits, so
//! subscribers never hear about a mutation that was rolled back. Other CRM
//! modules (dashboards, search indexers, permission caches) subscribe through
//! a tokio broadcast channel instead of polling the store.

use crate::models::{NodePath, OrgNode};
use serde::{Deserialize, Serialize};

/// One descendant whose path changed during a move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRewrite {
    pub id: String,
    pub old_path: NodePath,
    pub new_path: NodePath,
}

/// Domain events emitted by the hierarchy service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HierarchyEvent {
    /// A new organization was created
    NodeCreated { node: OrgNode },

    /// An organization was re-parented; `rewritten` lists every descendant
    #[serde(rename_all = "camelCase")]
    NodeMoved {
        node: OrgNode,
        old_path: NodePath,
        rewritten: Vec<PathRewrite>,
    },

    /// An organization was deleted
    NodeDeleted { id: String, path: NodePath },

    /// Descriptive attributes changed (structure untouched)
    AttributesUpdated { node: OrgNode },
}

impl HierarchyEvent {
    /// Get a string representation of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            HierarchyEvent::NodeCreated { .. } => "node:created",
            HierarchyEvent::NodeMoved { .. } => "node:moved",
            HierarchyEvent::NodeDeleted { .. } => "node:deleted",
            HierarchyEvent::AttributesUpdated { .. } => "node:attributes-updated",
        }
    }

    /// Id of the organization the event is about
    pub fn node_id(&self) -> &str {
        match self {
            HierarchyEvent::NodeCreated { node }
            | HierarchyEvent::NodeMoved { node, .. }
            | HierarchyEvent::AttributesUpdated { node } => node.id(),
            HierarchyEvent::NodeDeleted { id, .. } => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Contract test: hosts forwarding events as JSON rely on this exact shape
    #[test]
    fn test_node_moved_serialization_contract() {
        let event = HierarchyEvent::NodeMoved {
            node: serde_json::from_value(serde_json::json!({
                "id": "b",
                "parentId": null,
                "orgType": "parent",
                "path": "b",
                "version": 2,
                "createdAt": "2025-01-03T10:00:00Z",
                "modifiedAt": "2025-01-03T11:00:00Z",
                "attributes": {"name": "B"}
            }))
            .unwrap(),
            old_path: NodePath::parse("a.b").unwrap(),
            rewritten: vec![PathRewrite {
                id: "c".to_string(),
                old_path: NodePath::parse("a.b.c").unwrap(),
                new_path: NodePath::parse("b.c").unwrap(),
            }],
        };

        let parsed = serde_json::to_value(&event).unwrap();
        assert_eq!(parsed["type"], "nodeMoved");
        assert_eq!(parsed["oldPath"], "a.b");
        assert_eq!(parsed["node"]["path"], "b");
        assert_eq!(parsed["rewritten"][0]["newPath"], "b.c");
        assert_eq!(event.event_type(), "node:moved");
        assert_eq!(event.node_id(), "b");
    }
}
