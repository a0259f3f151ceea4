//! OrgTree Core - Organizational Hierarchy Manager
//!
//! Manages a strict three-level tree of organizations inside a CRM:
//!
//! ```text
//! Parent -> Subsidiary -> Branch
//! ```
//!
//! A node's type is derived from its depth, and its position is stored as a
//! materialized path (root id first, own id last), so descendant queries are
//! single prefix-range scans.
//!
//! # Architecture
//!
//! - **Derived structure**: `org_type`, `parent_id` and depth all follow from
//!   the path; only `HierarchyService` writes them
//! - **Atomic moves**: a re-parent rewrites the node and its whole subtree in
//!   one guarded transaction
//! - **Optimistic concurrency**: stale plans fail with `Conflict` and are
//!   never retried internally
//! - **Pluggable storage**: in-memory store or libsql/Turso behind
//!   `HierarchyStore`
//!
//! # Modules
//!
//! - [`models`] - `NodePath`, `OrgNode`, `OrgType`, attributes
//! - [`db`] - `HierarchyStore` trait, `MemoryStore`, `TursoStore`, events
//! - [`services`] - `HierarchyService`, `QueryEngine`, cache, reference data
//! - [`telemetry`] - tracing subscriber setup for hosts

pub mod db;
pub mod models;
pub mod services;
pub mod telemetry;

// Re-export commonly used types
pub use db::{HierarchyEvent, HierarchyStore, MemoryStore, StoreError};
#[cfg(feature = "turso")]
pub use db::TursoStore;
pub use models::*;
pub use services::*;
