//! MemoryStore - In-Process HierarchyStore
//!
//! Keeps every organization in a `HashMap` guarded by a single tokio
//! `RwLock`, with two secondary indexes:
//!
//! - `by_path`: `BTreeMap<encoded path, id>` for prefix-range subtree scans
//! - `children`: `parent id -> child ids` for direct-child lookups
//!
//! Commits hold the write lock for the whole transaction, so readers see
//! either the state before or the state after a move, never a mix. Writes
//! are recorded in an undo log and rolled back if any step fails.
//!
//! Intended for tests, embedded hosts, and small trees.

use crate::db::hierarchy_store::{
    CommitReceipt, Guard, HierarchyStore, HierarchyTransaction, StoreError, WriteOp,
};
use crate::models::{NodePath, OrgNode};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<String, OrgNode>,
    by_path: BTreeMap<String, String>,
    children: HashMap<String, BTreeSet<String>>,
}

/// Inverse of one applied write
enum Undo {
    Remove(String),
    Restore(OrgNode),
}

impl Tables {
    fn insert_row(&mut self, node: OrgNode) -> Option<OrgNode> {
        let previous = self.remove_row(node.id());
        self.by_path
            .insert(node.path().encode(), node.id().to_string());
        if let Some(parent_id) = node.parent_id() {
            self.children
                .entry(parent_id.to_string())
                .or_default()
                .insert(node.id().to_string());
        }
        self.rows.insert(node.id().to_string(), node);
        previous
    }

    fn remove_row(&mut self, id: &str) -> Option<OrgNode> {
        let node = self.rows.remove(id)?;
        self.by_path.remove(&node.path().encode());
        if let Some(parent_id) = node.parent_id() {
            if let Some(siblings) = self.children.get_mut(parent_id) {
                siblings.remove(id);
                if siblings.is_empty() {
                    self.children.remove(parent_id);
                }
            }
        }
        Some(node)
    }

    fn child_count(&self, id: &str) -> usize {
        self.children.get(id).map_or(0, BTreeSet::len)
    }

    fn subtree_ids(&self, prefix: &NodePath) -> Vec<String> {
        let (lower, upper) = prefix.descendant_range();
        self.by_path
            .range(lower..upper)
            .map(|(_, id)| id.clone())
            .collect()
    }

    fn check_guard(&self, guard: &Guard) -> Result<(), StoreError> {
        match guard {
            Guard::ExpectVersion { id, version } => match self.rows.get(id) {
                Some(node) if node.version() == *version => Ok(()),
                Some(node) => Err(StoreError::conflict(
                    id,
                    format!(
                        "expected version {}, found {}",
                        version,
                        node.version()
                    ),
                )),
                None => Err(StoreError::conflict(id, "node no longer exists")),
            },
            Guard::ExpectAbsent { id } => {
                if self.rows.contains_key(id) {
                    Err(StoreError::conflict(id, "node already exists"))
                } else {
                    Ok(())
                }
            }
            Guard::ExpectNoChildren { id } => match self.child_count(id) {
                0 => Ok(()),
                n => Err(StoreError::conflict(id, format!("node gained {} children", n))),
            },
        }
    }

    fn apply(&mut self, op: WriteOp, undo: &mut Vec<Undo>) -> Result<usize, StoreError> {
        match op {
            WriteOp::Insert(node) => {
                if self.rows.contains_key(node.id()) {
                    return Err(StoreError::conflict(node.id(), "node already exists"));
                }
                if self.by_path.contains_key(&node.path().encode()) {
                    return Err(StoreError::conflict(node.id(), "path already in use"));
                }
                undo.push(Undo::Remove(node.id().to_string()));
                self.insert_row(node);
                Ok(1)
            }
            WriteOp::Update(node) => {
                if !self.rows.contains_key(node.id()) {
                    return Err(StoreError::conflict(node.id(), "node no longer exists"));
                }
                if let Some(previous) = self.insert_row(node) {
                    undo.push(Undo::Restore(previous));
                }
                Ok(1)
            }
            WriteOp::RewritePrefix {
                old_prefix,
                new_prefix,
                expected_rows,
                modified_at,
            } => {
                let ids = self.subtree_ids(&old_prefix);
                if ids.len() != expected_rows {
                    return Err(StoreError::conflict(
                        old_prefix.leaf(),
                        format!(
                            "subtree has {} descendants, expected {}",
                            ids.len(),
                            expected_rows
                        ),
                    ));
                }
                // Remove the whole subtree first so old and new paths never
                // collide in the path index mid-rewrite.
                let mut removed = Vec::with_capacity(ids.len());
                for id in &ids {
                    if let Some(node) = self.remove_row(id) {
                        undo.push(Undo::Restore(node.clone()));
                        removed.push(node);
                    }
                }
                for node in removed {
                    let rewritten =
                        node.with_rewritten_prefix(&old_prefix, &new_prefix, modified_at)?;
                    undo.push(Undo::Remove(rewritten.id().to_string()));
                    self.insert_row(rewritten);
                }
                Ok(ids.len())
            }
            WriteOp::Delete { id } => match self.remove_row(&id) {
                Some(node) => {
                    undo.push(Undo::Restore(node));
                    Ok(1)
                }
                None => Err(StoreError::conflict(id, "node no longer exists")),
            },
        }
    }

    fn rollback(&mut self, undo: Vec<Undo>) {
        for step in undo.into_iter().rev() {
            match step {
                Undo::Remove(id) => {
                    self.remove_row(&id);
                }
                Undo::Restore(node) => {
                    self.insert_row(node);
                }
            }
        }
    }
}

/// In-memory `HierarchyStore`
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored organizations
    pub async fn len(&self) -> usize {
        self.tables.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl HierarchyStore for MemoryStore {
    async fn get_node(&self, id: &str) -> Result<Option<OrgNode>, StoreError> {
        Ok(self.tables.read().await.rows.get(id).cloned())
    }

    async fn get_nodes(&self, ids: &[String]) -> Result<Vec<OrgNode>, StoreError> {
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.rows.get(id).cloned())
            .collect())
    }

    async fn get_children(&self, parent_id: &str) -> Result<Vec<OrgNode>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .children
            .get(parent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.rows.get(id).cloned())
            .collect())
    }

    async fn count_children(&self, parent_id: &str) -> Result<usize, StoreError> {
        Ok(self.tables.read().await.child_count(parent_id))
    }

    async fn scan_subtree(&self, prefix: &NodePath) -> Result<Vec<OrgNode>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .subtree_ids(prefix)
            .iter()
            .filter_map(|id| tables.rows.get(id).cloned())
            .collect())
    }

    async fn commit(&self, tx: HierarchyTransaction) -> Result<CommitReceipt, StoreError> {
        let mut tables = self.tables.write().await;

        for guard in &tx.guards {
            if let Err(e) = tables.check_guard(guard) {
                tracing::debug!("MemoryStore: '{}' rejected by guard: {}", tx.label, e);
                return Err(e);
            }
        }

        let mut undo = Vec::new();
        let mut rows_written = 0;
        for op in tx.writes {
            match tables.apply(op, &mut undo) {
                Ok(n) => rows_written += n,
                Err(e) => {
                    tracing::debug!("MemoryStore: rolling back '{}': {}", tx.label, e);
                    tables.rollback(undo);
                    return Err(e);
                }
            }
        }

        Ok(CommitReceipt { rows_written })
    }
}
