//! TursoStore - HierarchyStore Implementation for Turso/libsql Backend
//!
//! Persists organizations in a single `org_nodes` table. The materialized
//! path is stored in dotted form in a `path` column with a B-tree index, so
//! subtree scans become index range scans:
//!
//! ```sql
//! SELECT ... FROM org_nodes WHERE path >= 'a.b.' AND path < 'a.b/'
//! ```
//!
//! # Transactions
//!
//! `commit()` opens `BEGIN IMMEDIATE`, which takes SQLite's write lock up
//! front. Guards are re-checked inside the transaction; any failure issues
//! `ROLLBACK` before the error is returned. Descendant rewrites run as one
//! bulk `UPDATE` whose row count must match the planned count.
//!
//! # Connection Pattern
//!
//! Every operation opens a fresh connection with a busy timeout, so
//! concurrent writers wait for the lock instead of failing with
//! `SQLITE_BUSY`. WAL mode lets readers proceed while a move is in flight;
//! they only ever see committed paths.
//!
//! # Examples
//!
//! ```rust,no_run
//! use orgtree_core::db::{HierarchyStore, TursoStore};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store: Arc<dyn HierarchyStore> =
//!         Arc::new(TursoStore::new(PathBuf::from("./data/orgs.db")).await?);
//!     let node = store.get_node("acme").await?;
//!     Ok(())
//! }
//! ```

use crate::db::error::{is_unique_violation, DatabaseError};
use crate::db::hierarchy_store::{
    CommitReceipt, Guard, HierarchyStore, HierarchyTransaction, StoreError, WriteOp,
};
use crate::models::{NodePath, OrgAttributes, OrgNode, OrgNodeRecord, OrgType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Database, Row};
use std::path::PathBuf;
use std::sync::Arc;

/// Default busy timeout applied to every connection
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

const NODE_COLUMNS: &str =
    "id, parent_id, org_type, path, version, created_at, modified_at, attributes";

/// libsql-backed `HierarchyStore`
#[derive(Clone)]
pub struct TursoStore {
    db: Arc<Database>,
    db_path: PathBuf,
    busy_timeout_ms: u64,
}

impl TursoStore {
    /// Open (or create) the database at `db_path` and initialize the schema
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if:
    /// - Parent directory cannot be created
    /// - Database connection fails
    /// - Schema initialization fails
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        Self::with_busy_timeout(db_path, DEFAULT_BUSY_TIMEOUT_MS).await
    }

    /// Same as [`TursoStore::new`] with an explicit busy timeout
    pub async fn with_busy_timeout(
        db_path: PathBuf,
        busy_timeout_ms: u64,
    ) -> Result<Self, DatabaseError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DatabaseError::directory(parent.to_path_buf(), e))?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::open(db_path.clone(), e))?;

        let store = Self {
            db: Arc::new(db),
            db_path,
            busy_timeout_ms,
        };
        store.initialize_schema().await?;

        tracing::info!("TursoStore ready at {}", store.db_path.display());
        Ok(store)
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    /// PRAGMA statements return rows, so they go through `query()`
    async fn execute_pragma(conn: &Connection, pragma: &str) -> Result<(), DatabaseError> {
        let mut stmt = conn
            .prepare(pragma)
            .await
            .map_err(|e| DatabaseError::pragma(pragma, e))?;
        let _ = stmt
            .query(())
            .await
            .map_err(|e| DatabaseError::pragma(pragma, e))?;
        Ok(())
    }

    async fn initialize_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        Self::execute_pragma(&conn, "PRAGMA journal_mode = WAL").await?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS org_nodes (
                id TEXT PRIMARY KEY,
                -- Weak reference: no foreign key, no cascade
                parent_id TEXT,
                org_type TEXT NOT NULL CHECK (org_type IN ('parent', 'subsidiary', 'branch')),
                path TEXT NOT NULL,
                depth INTEGER NOT NULL CHECK (depth BETWEEN 1 AND 3),
                version INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                modified_at TEXT NOT NULL,
                attributes JSON NOT NULL DEFAULT '{}'
            )",
            (),
        )
        .await
        .map_err(|e| DatabaseError::schema("org_nodes table", e))?;

        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_org_nodes_path ON org_nodes(path)",
            (),
        )
        .await
        .map_err(|e| DatabaseError::schema("idx_org_nodes_path", e))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_org_nodes_parent ON org_nodes(parent_id)",
            (),
        )
        .await
        .map_err(|e| DatabaseError::schema("idx_org_nodes_parent", e))?;

        Ok(())
    }

    /// Connection with the busy timeout configured
    async fn connect_with_timeout(&self) -> Result<Connection, DatabaseError> {
        let conn = self
            .db
            .connect()
            .map_err(|e| DatabaseError::open(self.db_path.clone(), e))?;
        Self::execute_pragma(
            &conn,
            &format!("PRAGMA busy_timeout = {}", self.busy_timeout_ms),
        )
        .await?;
        Ok(conn)
    }

    fn parse_timestamp(
        id: &str,
        column: &'static str,
        raw: &str,
    ) -> Result<DateTime<Utc>, DatabaseError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| DatabaseError::row_decode(id, column, e))
    }

    /// Decode one `NODE_COLUMNS` row; any unreadable column is reported
    /// against the row's id
    fn row_to_node(row: &Row) -> Result<OrgNode, StoreError> {
        let id: String = row
            .get(0)
            .map_err(|e| DatabaseError::row_decode("<unknown>", "id", e))?;
        let column = |name: &'static str| {
            let id = id.clone();
            move |e: libsql::Error| DatabaseError::row_decode(id, name, e)
        };

        let parent_id: Option<String> = row.get(1).map_err(column("parent_id"))?;
        let org_type: String = row.get(2).map_err(column("org_type"))?;
        let path: String = row.get(3).map_err(column("path"))?;
        let version: i64 = row.get(4).map_err(column("version"))?;
        let created_at: String = row.get(5).map_err(column("created_at"))?;
        let modified_at: String = row.get(6).map_err(column("modified_at"))?;
        let attributes: String = row.get(7).map_err(column("attributes"))?;

        let attributes: OrgAttributes = serde_json::from_str(&attributes)
            .map_err(|e| DatabaseError::row_decode(&id, "attributes", e))?;

        let record = OrgNodeRecord {
            org_type: org_type
                .parse::<OrgType>()
                .map_err(|e| DatabaseError::row_decode(&id, "org_type", e))?,
            path: NodePath::parse(&path).map_err(|e| DatabaseError::row_decode(&id, "path", e))?,
            created_at: Self::parse_timestamp(&id, "created_at", &created_at)?,
            modified_at: Self::parse_timestamp(&id, "modified_at", &modified_at)?,
            id,
            parent_id,
            version,
            attributes,
        };
        // Path, type and parent must still agree with each other
        Ok(OrgNode::restore(record)?)
    }

    async fn query_nodes(
        conn: &Connection,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<OrgNode>, StoreError> {
        let mut rows = conn
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::statement("select", e))?;

        let mut nodes = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::statement("select", e))?
        {
            nodes.push(Self::row_to_node(&row)?);
        }
        Ok(nodes)
    }

    async fn fetch_node(conn: &Connection, id: &str) -> Result<Option<OrgNode>, StoreError> {
        let sql = format!("SELECT {} FROM org_nodes WHERE id = ?", NODE_COLUMNS);
        Ok(Self::query_nodes(conn, &sql, [id]).await?.into_iter().next())
    }

    async fn fetch_count(conn: &Connection, sql: &str, id: &str) -> Result<i64, StoreError> {
        let mut rows = conn
            .query(sql, [id])
            .await
            .map_err(|e| DatabaseError::statement("count", e))?;
        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::statement("count", e))?
            .ok_or_else(|| DatabaseError::row_decode(id, "COUNT(*)", "no result row"))?;
        Ok(row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::row_decode(id, "COUNT(*)", e))?)
    }

    async fn check_guard(conn: &Connection, guard: &Guard) -> Result<(), StoreError> {
        match guard {
            Guard::ExpectVersion { id, version } => match Self::fetch_node(conn, id).await? {
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
                let count =
                    Self::fetch_count(conn, "SELECT COUNT(*) FROM org_nodes WHERE id = ?", id)
                        .await?;
                if count == 0 {
                    Ok(())
                } else {
                    Err(StoreError::conflict(id, "node already exists"))
                }
            }
            Guard::ExpectNoChildren { id } => {
                let count = Self::fetch_count(
                    conn,
                    "SELECT COUNT(*) FROM org_nodes WHERE parent_id = ?",
                    id,
                )
                .await?;
                if count == 0 {
                    Ok(())
                } else {
                    Err(StoreError::conflict(
                        id,
                        format!("node gained {} children", count),
                    ))
                }
            }
        }
    }

    /// A duplicate id or path means another writer got there first; any
    /// other failure is the database's own
    fn write_error(id: &str, operation: &'static str, err: libsql::Error) -> StoreError {
        if is_unique_violation(&err) {
            StoreError::conflict(id, format!("{} rejected: {}", operation, err))
        } else {
            DatabaseError::statement(operation, err).into()
        }
    }

    async fn apply_write(conn: &Connection, op: &WriteOp) -> Result<usize, StoreError> {
        match op {
            WriteOp::Insert(node) => {
                let attributes = serde_json::to_string(&node.attributes)
                    .map_err(|e| StoreError::corrupted(e.to_string()))?;
                conn.execute(
                    "INSERT INTO org_nodes (id, parent_id, org_type, path, depth, version, created_at, modified_at, attributes)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    (
                        node.id(),
                        node.parent_id(),
                        node.org_type().as_str(),
                        node.path().encode(),
                        node.depth() as i64,
                        node.version(),
                        node.created_at().to_rfc3339(),
                        node.modified_at().to_rfc3339(),
                        attributes,
                    ),
                )
                .await
                .map_err(|e| Self::write_error(node.id(), "insert", e))?;
                Ok(1)
            }
            WriteOp::Update(node) => {
                let attributes = serde_json::to_string(&node.attributes)
                    .map_err(|e| StoreError::corrupted(e.to_string()))?;
                let affected = conn
                    .execute(
                        "UPDATE org_nodes SET parent_id = ?, org_type = ?, path = ?, depth = ?, version = ?, modified_at = ?, attributes = ?
                         WHERE id = ?",
                        (
                            node.parent_id(),
                            node.org_type().as_str(),
                            node.path().encode(),
                            node.depth() as i64,
                            node.version(),
                            node.modified_at().to_rfc3339(),
                            attributes,
                            node.id(),
                        ),
                    )
                    .await
                    .map_err(|e| Self::write_error(node.id(), "update", e))?;
                if affected == 0 {
                    return Err(StoreError::conflict(node.id(), "node no longer exists"));
                }
                Ok(1)
            }
            WriteOp::RewritePrefix {
                old_prefix,
                new_prefix,
                expected_rows,
                modified_at,
            } => {
                let old_encoded = old_prefix.encode();
                let (lower, upper) = old_prefix.descendant_range();
                let depth_delta = new_prefix.depth() as i64 - old_prefix.depth() as i64;

                // SET expressions see the pre-update row, so `depth + ?` uses
                // the old depth on both lines.
                let affected = conn
                    .execute(
                        "UPDATE org_nodes SET
                            path = ? || substr(path, ?),
                            depth = depth + ?,
                            org_type = CASE depth + ? WHEN 1 THEN 'parent' WHEN 2 THEN 'subsidiary' ELSE 'branch' END,
                            version = version + 1,
                            modified_at = ?
                         WHERE path >= ? AND path < ?",
                        (
                            new_prefix.encode(),
                            old_encoded.len() as i64 + 1,
                            depth_delta,
                            depth_delta,
                            modified_at.to_rfc3339(),
                            lower,
                            upper,
                        ),
                    )
                    .await
                    .map_err(|e| Self::write_error(old_prefix.leaf(), "subtree rewrite", e))?;

                if affected as usize != *expected_rows {
                    return Err(StoreError::conflict(
                        old_prefix.leaf(),
                        format!(
                            "subtree has {} descendants, expected {}",
                            affected, expected_rows
                        ),
                    ));
                }
                Ok(affected as usize)
            }
            WriteOp::Delete { id } => {
                let affected = conn
                    .execute("DELETE FROM org_nodes WHERE id = ?", [id.as_str()])
                    .await
                    .map_err(|e| DatabaseError::statement("delete", e))?;
                if affected == 0 {
                    return Err(StoreError::conflict(id, "node no longer exists"));
                }
                Ok(1)
            }
        }
    }

    async fn apply_in_transaction(
        conn: &Connection,
        tx: &HierarchyTransaction,
    ) -> Result<usize, StoreError> {
        for guard in &tx.guards {
            Self::check_guard(conn, guard).await?;
        }
        let mut rows_written = 0;
        for op in &tx.writes {
            rows_written += Self::apply_write(conn, op).await?;
        }
        Ok(rows_written)
    }
}

#[async_trait]
impl HierarchyStore for TursoStore {
    async fn get_node(&self, id: &str) -> Result<Option<OrgNode>, StoreError> {
        let conn = self.connect_with_timeout().await?;
        Self::fetch_node(&conn, id).await
    }

    async fn get_nodes(&self, ids: &[String]) -> Result<Vec<OrgNode>, StoreError> {
        let conn = self.connect_with_timeout().await?;
        let mut nodes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(node) = Self::fetch_node(&conn, id).await? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    async fn get_children(&self, parent_id: &str) -> Result<Vec<OrgNode>, StoreError> {
        let conn = self.connect_with_timeout().await?;
        let sql = format!(
            "SELECT {} FROM org_nodes WHERE parent_id = ? ORDER BY path",
            NODE_COLUMNS
        );
        Self::query_nodes(&conn, &sql, [parent_id]).await
    }

    async fn count_children(&self, parent_id: &str) -> Result<usize, StoreError> {
        let conn = self.connect_with_timeout().await?;
        let count = Self::fetch_count(
            &conn,
            "SELECT COUNT(*) FROM org_nodes WHERE parent_id = ?",
            parent_id,
        )
        .await?;
        Ok(count as usize)
    }

    async fn scan_subtree(&self, prefix: &NodePath) -> Result<Vec<OrgNode>, StoreError> {
        let conn = self.connect_with_timeout().await?;
        let (lower, upper) = prefix.descendant_range();
        let sql = format!(
            "SELECT {} FROM org_nodes WHERE path >= ? AND path < ? ORDER BY depth, path",
            NODE_COLUMNS
        );
        Self::query_nodes(&conn, &sql, (lower, upper)).await
    }

    async fn commit(&self, tx: HierarchyTransaction) -> Result<CommitReceipt, StoreError> {
        let conn = self.connect_with_timeout().await?;

        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| DatabaseError::transaction(tx.label, "begin", e))?;

        match Self::apply_in_transaction(&conn, &tx).await {
            Ok(rows_written) => {
                if let Err(e) = conn.execute("COMMIT", ()).await {
                    let _rollback = conn.execute("ROLLBACK", ()).await;
                    return Err(DatabaseError::transaction(tx.label, "commit", e).into());
                }
                Ok(CommitReceipt { rows_written })
            }
            Err(e) => {
                tracing::debug!("TursoStore: rolling back '{}': {}", tx.label, e);
                let _rollback = conn.execute("ROLLBACK", ()).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    async fn create_test_store() -> (TursoStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("orgs.db");
        let store = TursoStore::new(db_path).await.unwrap();
        (store, temp_dir)
    }

    fn root(id: &str) -> OrgNode {
        OrgNode::new_root(id.to_string(), OrgAttributes::named(id), Utc::now()).unwrap()
    }

    fn child(id: &str, parent: &OrgNode) -> OrgNode {
        OrgNode::new_child(id.to_string(), parent, OrgAttributes::named(id), Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let (store, _temp) = create_test_store().await;
        let a = root("a");
        let mut b = child("b", &a);
        b.attributes = OrgAttributes::named("Acme EU").with_industry("retail");

        store
            .commit(
                HierarchyTransaction::new("seed")
                    .write(WriteOp::Insert(a.clone()))
                    .write(WriteOp::Insert(b.clone())),
            )
            .await
            .unwrap();

        let fetched = store.get_node("b").await.unwrap().unwrap();
        assert_eq!(fetched.path().encode(), "a.b");
        assert_eq!(fetched.org_type(), OrgType::Subsidiary);
        assert_eq!(fetched.attributes.industry_id.as_deref(), Some("retail"));
        assert_eq!(store.count_children("a").await.unwrap(), 1);
        assert!(store.get_node("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rewrite_prefix_updates_depth_and_type() {
        let (store, _temp) = create_test_store().await;
        let a = root("a");
        let b = child("b", &a);
        let c = child("c", &b);
        store
            .commit(
                HierarchyTransaction::new("seed")
                    .write(WriteOp::Insert(a.clone()))
                    .write(WriteOp::Insert(b.clone()))
                    .write(WriteOp::Insert(c.clone())),
            )
            .await
            .unwrap();

        let mut promoted = b.clone();
        promoted
            .relocate(NodePath::root("b").unwrap(), Utc::now())
            .unwrap();
        store
            .commit(
                HierarchyTransaction::new("move")
                    .guard(Guard::version(&b))
                    .write(WriteOp::Update(promoted))
                    .write(WriteOp::RewritePrefix {
                        old_prefix: b.path().clone(),
                        new_prefix: NodePath::root("b").unwrap(),
                        expected_rows: 1,
                        modified_at: Utc::now(),
                    }),
            )
            .await
            .unwrap();

        let c_after = store.get_node("c").await.unwrap().unwrap();
        assert_eq!(c_after.path().encode(), "b.c");
        assert_eq!(c_after.org_type(), OrgType::Subsidiary);
        assert_eq!(c_after.version(), 2);
        assert!(store.scan_subtree(a.path()).await.unwrap().is_empty());
        assert_eq!(store.scan_subtree(&NodePath::root("b").unwrap()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_guard_failure_rolls_back() {
        let (store, _temp) = create_test_store().await;
        let a = root("a");
        store
            .commit(HierarchyTransaction::new("seed").write(WriteOp::Insert(a.clone())))
            .await
            .unwrap();

        let result = store
            .commit(
                HierarchyTransaction::new("stale")
                    .write(WriteOp::Insert(root("z")))
                    .write(WriteOp::Delete {
                        id: "missing".to_string(),
                    }),
            )
            .await;

        assert!(matches!(result, Err(StoreError::Conflict { .. })));
        assert!(store.get_node("z").await.unwrap().is_none());

        // Connection is usable after rollback
        assert!(store.get_node("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_scan_subtree_excludes_sibling_prefixes() {
        let (store, _temp) = create_test_store().await;
        let a = root("a");
        let ab = root("ab");
        let b = child("b", &a);
        let x = child("x", &ab);
        store
            .commit(
                HierarchyTransaction::new("seed")
                    .write(WriteOp::Insert(a.clone()))
                    .write(WriteOp::Insert(ab))
                    .write(WriteOp::Insert(b))
                    .write(WriteOp::Insert(x)),
            )
            .await
            .unwrap();

        let subtree = store.scan_subtree(a.path()).await.unwrap();
        assert_eq!(subtree.len(), 1);
        assert_eq!(subtree[0].id(), "b");
    }

    #[tokio::test]
    async fn test_reopen_preserves_rows() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("orgs.db");

        {
            let store = TursoStore::new(db_path.clone()).await.unwrap();
            store
                .commit(HierarchyTransaction::new("seed").write(WriteOp::Insert(root("a"))))
                .await
                .unwrap();
        }

        let reopened = TursoStore::new(db_path).await.unwrap();
        assert!(reopened.get_node("a").await.unwrap().is_some());
    }

    async fn seed_chain(store: &TursoStore) -> (OrgNode, OrgNode, OrgNode) {
        let a = root("A");
        let b = child("B", &a);
        let c = child("C", &b);
        store
            .commit(
                HierarchyTransaction::new("seed")
                    .write(WriteOp::Insert(a.clone()))
                    .write(WriteOp::Insert(b.clone()))
                    .write(WriteOp::Insert(c.clone())),
            )
            .await
            .unwrap();
        (a, b, c)
    }

    fn conflict_reason(result: Result<CommitReceipt, StoreError>) -> String {
        match result {
            Err(StoreError::Conflict { reason, .. }) => reason,
            other => panic!("Expected conflict, got {:?}", other.map(|r| r.rows_written)),
        }
    }

    #[tokio::test]
    async fn test_stale_version_guard_is_conflict() {
        let (store, _temp) = create_test_store().await;
        let (_, b, _) = seed_chain(&store).await;

        let mut renamed = b.clone();
        renamed.attributes = OrgAttributes::named("Renamed");
        let result = store
            .commit(
                HierarchyTransaction::new("update")
                    .guard(Guard::ExpectVersion {
                        id: "B".to_string(),
                        version: 9,
                    })
                    .write(WriteOp::Update(renamed)),
            )
            .await;

        assert_eq!(conflict_reason(result), "expected version 9, found 1");
        let b_after = store.get_node("B").await.unwrap().unwrap();
        assert_eq!(b_after.name(), "B");
        assert_eq!(b_after.version(), 1);
    }

    #[tokio::test]
    async fn test_rewrite_row_count_mismatch_rolls_back() {
        let (store, _temp) = create_test_store().await;
        let (a, b, _) = seed_chain(&store).await;
        let a2 = root("A2");
        store
            .commit(HierarchyTransaction::new("seed").write(WriteOp::Insert(a2.clone())))
            .await
            .unwrap();

        let mut moved = b.clone();
        moved
            .relocate(a2.path().append("B").unwrap(), Utc::now())
            .unwrap();
        let result = store
            .commit(
                HierarchyTransaction::new("move")
                    .guard(Guard::version(&b))
                    .write(WriteOp::Update(moved))
                    .write(WriteOp::RewritePrefix {
                        old_prefix: b.path().clone(),
                        new_prefix: a2.path().append("B").unwrap(),
                        expected_rows: 0,
                        modified_at: Utc::now(),
                    }),
            )
            .await;

        assert_eq!(
            conflict_reason(result),
            "subtree has 1 descendants, expected 0"
        );

        // Neither the moved node nor its descendant kept the partial write
        let b_after = store.get_node("B").await.unwrap().unwrap();
        assert_eq!(b_after.path().encode(), "A.B");
        assert_eq!(b_after.version(), 1);
        let c_after = store.get_node("C").await.unwrap().unwrap();
        assert_eq!(c_after.path().encode(), "A.B.C");
        assert_eq!(c_after.version(), 1);
        assert_eq!(store.scan_subtree(a.path()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_no_children_guard_blocks_delete() {
        let (store, _temp) = create_test_store().await;
        let (_, b, _) = seed_chain(&store).await;

        let result = store
            .commit(
                HierarchyTransaction::new("delete")
                    .guard(Guard::version(&b))
                    .guard(Guard::ExpectNoChildren {
                        id: "B".to_string(),
                    })
                    .write(WriteOp::Delete {
                        id: "B".to_string(),
                    }),
            )
            .await;

        assert_eq!(conflict_reason(result), "node gained 1 children");
        assert!(store.get_node("B").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_absent_guard_rejects_existing_id() {
        let (store, _temp) = create_test_store().await;
        seed_chain(&store).await;

        let result = store
            .commit(
                HierarchyTransaction::new("create")
                    .guard(Guard::ExpectAbsent {
                        id: "A".to_string(),
                    })
                    .write(WriteOp::Insert(root("A"))),
            )
            .await;

        assert_eq!(conflict_reason(result), "node already exists");
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_conflict() {
        let (store, _temp) = create_test_store().await;
        seed_chain(&store).await;

        // No guard: the primary key catches the duplicate
        let result = store
            .commit(HierarchyTransaction::new("create").write(WriteOp::Insert(root("A"))))
            .await;

        assert!(conflict_reason(result).contains("UNIQUE constraint failed"));
    }

    #[tokio::test]
    async fn test_insert_failure_without_unique_violation_is_database_error() {
        let (store, _temp) = create_test_store().await;
        let conn = store.db.connect().unwrap();
        conn.execute("DROP TABLE org_nodes", ()).await.unwrap();

        let result = store
            .commit(HierarchyTransaction::new("create").write(WriteOp::Insert(root("A"))))
            .await;

        match result {
            Err(StoreError::Database(DatabaseError::Statement { operation, .. })) => {
                assert_eq!(operation, "insert");
            }
            other => panic!(
                "Expected database error, got {:?}",
                other.map(|r| r.rows_written)
            ),
        }
    }

    #[tokio::test]
    async fn test_undecodable_row_is_corruption() {
        let (store, _temp) = create_test_store().await;
        seed_chain(&store).await;
        let conn = store.db.connect().unwrap();
        conn.execute(
            "UPDATE org_nodes SET attributes = 'not json' WHERE id = 'C'",
            (),
        )
        .await
        .unwrap();

        match store.get_node("C").await {
            Err(StoreError::Corrupted(message)) => {
                assert!(message.contains("org_nodes row 'C'"));
                assert!(message.contains("attributes"));
            }
            other => panic!("Expected corruption, got {:?}", other.map(|n| n.is_some())),
        }
        assert!(store.get_node("B").await.unwrap().is_some());
    }
}
