//! Query Engine - Descendant and Ancestor Retrieval
//!
//! Translates hierarchy reads into store-level operations:
//!
//! - **descendants**: one prefix-range scan over the path index
//! - **ancestors**: the ancestor ids are already in the node's path, so they
//!   are fetched by id (at most two lookups given the depth bound)
//!
//! Every row returned by the store is checked against the prefix rule before
//! it is handed back. A row that no longer matches (the caller's snapshot
//! went stale while a move committed) is dropped with a warning rather than
//! returned in the wrong position.

use crate::db::{HierarchyStore, StoreError};
use crate::models::OrgNode;
use std::sync::Arc;

/// Read-side helper used by `HierarchyService`
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn HierarchyStore>,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn HierarchyStore>) -> Self {
        Self { store }
    }

    /// Strict descendants of `node`, shallowest first (ties ordered by path)
    pub async fn descendants(&self, node: &OrgNode) -> Result<Vec<OrgNode>, StoreError> {
        let mut descendants: Vec<OrgNode> = self
            .store
            .scan_subtree(node.path())
            .await?
            .into_iter()
            .filter(|d| {
                let keep = node.path().is_prefix_of(d.path()) && d.id() != node.id();
                if !keep {
                    tracing::warn!(
                        "QueryEngine: dropping {} ({}) from subtree of {}",
                        d.id(),
                        d.path(),
                        node.path()
                    );
                }
                keep
            })
            .collect();

        descendants.sort_by(|a, b| {
            a.depth()
                .cmp(&b.depth())
                .then_with(|| a.path().cmp(b.path()))
        });
        Ok(descendants)
    }

    /// Strict ancestors of `node`, nearest first
    pub async fn ancestors(&self, node: &OrgNode) -> Result<Vec<OrgNode>, StoreError> {
        let ids = node.path().ancestor_ids();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut ancestors: Vec<OrgNode> = self
            .store
            .get_nodes(ids)
            .await?
            .into_iter()
            .filter(|a| {
                let keep = a.path().is_prefix_of(node.path());
                if !keep {
                    tracing::warn!(
                        "QueryEngine: {} ({}) is no longer an ancestor of {}",
                        a.id(),
                        a.path(),
                        node.path()
                    );
                }
                keep
            })
            .collect();

        ancestors.sort_by(|a, b| b.depth().cmp(&a.depth()));
        Ok(ancestors)
    }

    /// Direct children of `node`, ordered by path
    pub async fn children(&self, node: &OrgNode) -> Result<Vec<OrgNode>, StoreError> {
        let mut children = self.store.get_children(node.id()).await?;
        children.retain(|c| c.path().parent_id() == Some(node.id()));
        children.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(children)
    }

    pub async fn count_direct_children(&self, id: &str) -> Result<usize, StoreError> {
        self.store.count_children(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{HierarchyTransaction, MemoryStore, WriteOp};
    use crate::models::OrgAttributes;
    use chrono::Utc;

    fn root(id: &str) -> OrgNode {
        OrgNode::new_root(id.to_string(), OrgAttributes::named(id), Utc::now()).unwrap()
    }

    fn child(id: &str, parent: &OrgNode) -> OrgNode {
        OrgNode::new_child(id.to_string(), parent, OrgAttributes::named(id), Utc::now()).unwrap()
    }

    async fn engine_with(nodes: Vec<OrgNode>) -> QueryEngine {
        let store = Arc::new(MemoryStore::new());
        let mut tx = HierarchyTransaction::new("seed");
        for node in nodes {
            tx = tx.write(WriteOp::Insert(node));
        }
        store.commit(tx).await.unwrap();
        QueryEngine::new(store)
    }

    #[tokio::test]
    async fn test_descendants_shallowest_first() {
        let a = root("a");
        let z = child("z", &a);
        let b = child("b", &a);
        let c = child("c", &z);
        let d = child("d", &b);
        let engine = engine_with(vec![a.clone(), z, b, c, d]).await;

        let ids: Vec<String> = engine
            .descendants(&a)
            .await
            .unwrap()
            .iter()
            .map(|n| n.id().to_string())
            .collect();

        // depth 2 before depth 3, path order within a level
        assert_eq!(ids, vec!["b", "z", "d", "c"]);
    }

    #[tokio::test]
    async fn test_ancestors_nearest_first() {
        let a = root("a");
        let b = child("b", &a);
        let c = child("c", &b);
        let engine = engine_with(vec![a.clone(), b, c.clone()]).await;

        let ids: Vec<String> = engine
            .ancestors(&c)
            .await
            .unwrap()
            .iter()
            .map(|n| n.id().to_string())
            .collect();
        assert_eq!(ids, vec!["b", "a"]);

        assert!(engine.ancestors(&a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ancestors_drop_stale_rows() {
        let a = root("a");
        let b = child("b", &a);
        let c = child("c", &b);
        // Store only has `b` as a root, so it no longer prefixes c's path
        let engine = engine_with(vec![a, root("b")]).await;

        let ancestors = engine.ancestors(&c).await.unwrap();
        assert_eq!(ancestors.len(), 1);
        assert_eq!(ancestors[0].id(), "a");
    }

    #[tokio::test]
    async fn test_children_and_count() {
        let a = root("a");
        let b = child("b", &a);
        let c = child("c", &a);
        let d = child("d", &b);
        let engine = engine_with(vec![a.clone(), c, b, d]).await;

        let children = engine.children(&a).await.unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].id(), "b");
        assert_eq!(engine.count_direct_children("a").await.unwrap(), 2);
        assert_eq!(engine.count_direct_children("d").await.unwrap(), 0);
    }
}
