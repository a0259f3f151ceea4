//! HierarchyStore Trait - Persistence Boundary for the Organization Tree
//!
//! This module defines the `HierarchyStore` trait that abstracts every read
//! and write the hierarchy service performs. The trait enables multiple
//! backends (in-memory map, libsql/Turso) without changing business logic
//! in `HierarchyService`.
//!
//! # Transactions
//!
//! Structural mutations are submitted as a single [`HierarchyTransaction`]:
//!
//! 1. **Guards** describe the snapshot the service planned against
//!    (row versions, absence of an id, absence of children). The store
//!    re-checks them after acquiring its write lock.
//! 2. **Writes** are applied in order. A bulk [`WriteOp::RewritePrefix`]
//!    rewrites every strict descendant of a path in one step.
//!
//! Either every guard holds and every write applies, or nothing changes and
//! the store returns [`StoreError::Conflict`]. Stores never retry.
//!
//! # Examples
//!
//! ```rust,no_run
//! use orgtree_core::db::{HierarchyStore, HierarchyTransaction, MemoryStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), orgtree_core::db::StoreError> {
//! let store: Arc<dyn HierarchyStore> = Arc::new(MemoryStore::new());
//! let node = store.get_node("acme").await?;
//! assert!(node.is_none());
//! # Ok(())
//! # }
//! ```

use crate::models::{NodePath, OrgNode, ValidationError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[cfg(feature = "turso")]
use crate::db::DatabaseError;

/// Errors surfaced by store implementations
#[derive(Error, Debug)]
pub enum StoreError {
    /// A guard failed: the data changed since the caller read it
    #[error("Conflicting change on node {node_id}: {reason}")]
    Conflict { node_id: String, reason: String },

    /// A stored row violates single-row invariants
    #[error("Stored hierarchy data is corrupted: {0}")]
    Corrupted(String),

    /// libsql failure unrelated to concurrent changes
    #[cfg(feature = "turso")]
    #[error("Database operation failed: {0}")]
    Database(DatabaseError),
}

impl StoreError {
    /// Create a conflict error
    pub fn conflict(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conflict {
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a corrupted-data error
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }
}

/// Undecodable rows are corruption; everything else stays a database failure
#[cfg(feature = "turso")]
impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        if err.is_row_decode() {
            Self::Corrupted(err.to_string())
        } else {
            Self::Database(err)
        }
    }
}

impl From<ValidationError> for StoreError {
    fn from(err: ValidationError) -> Self {
        Self::Corrupted(err.to_string())
    }
}

/// Precondition re-checked inside the transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// Row `id` exists and still has `version`
    ExpectVersion { id: String, version: i64 },
    /// No row with `id` exists
    ExpectAbsent { id: String },
    /// Row `id` has no direct children
    ExpectNoChildren { id: String },
}

impl Guard {
    pub fn version(node: &OrgNode) -> Self {
        Self::ExpectVersion {
            id: node.id().to_string(),
            version: node.version(),
        }
    }
}

/// Write applied inside the transaction
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Insert a new row
    Insert(OrgNode),
    /// Overwrite an existing row (the caller has already bumped the version)
    Update(OrgNode),
    /// Rewrite the path of every strict descendant of `old_prefix`
    ///
    /// For each descendant `d`: `d.path = d.path.replace_prefix(old, new)`,
    /// its type is re-derived from the new depth, its version is bumped and
    /// `modified_at` is set. `expected_rows` must match the number of rows
    /// found, otherwise the subtree changed since planning and the
    /// transaction fails with a conflict.
    RewritePrefix {
        old_prefix: NodePath,
        new_prefix: NodePath,
        expected_rows: usize,
        modified_at: DateTime<Utc>,
    },
    /// Remove a row
    Delete { id: String },
}

/// A batch of guards and writes committed atomically
#[derive(Debug, Clone)]
pub struct HierarchyTransaction {
    /// Operation name, used for logging
    pub label: &'static str,
    pub guards: Vec<Guard>,
    pub writes: Vec<WriteOp>,
}

impl HierarchyTransaction {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            guards: Vec::new(),
            writes: Vec::new(),
        }
    }

    pub fn guard(mut self, guard: Guard) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn guards(mut self, guards: impl IntoIterator<Item = Guard>) -> Self {
        self.guards.extend(guards);
        self
    }

    pub fn write(mut self, op: WriteOp) -> Self {
        self.writes.push(op);
        self
    }
}

/// Result of a successful commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitReceipt {
    /// Rows inserted, updated, rewritten or deleted
    pub rows_written: usize,
}

/// Abstraction layer for organization persistence
///
/// Implementations must be `Send + Sync` so the service can be shared across
/// tasks. Reads must observe only committed state: a subtree scan running
/// concurrently with a move sees either every old path or every new path.
#[async_trait]
pub trait HierarchyStore: Send + Sync {
    /// Get a node by id (`Ok(None)` if absent)
    async fn get_node(&self, id: &str) -> Result<Option<OrgNode>, StoreError>;

    /// Get every node whose id is in `ids` (missing ids are skipped)
    async fn get_nodes(&self, ids: &[String]) -> Result<Vec<OrgNode>, StoreError>;

    /// Direct children of `parent_id`
    async fn get_children(&self, parent_id: &str) -> Result<Vec<OrgNode>, StoreError>;

    /// Number of direct children of `parent_id`
    async fn count_children(&self, parent_id: &str) -> Result<usize, StoreError>;

    /// Every strict descendant of `prefix` (prefix-range scan, any order)
    async fn scan_subtree(&self, prefix: &NodePath) -> Result<Vec<OrgNode>, StoreError>;

    /// Apply a transaction atomically
    async fn commit(&self, tx: HierarchyTransaction) -> Result<CommitReceipt, StoreError>;
}
