//! Database Layer
//!
//! This module holds the persistence boundary of the hierarchy manager:
//!
//! - [`HierarchyStore`] - the injected store interface (reads, prefix-range
//!   scans, atomic guarded transactions)
//! - [`MemoryStore`] - in-process implementation backed by ordered maps
//! - [`TursoStore`] - durable implementation on libsql (feature `turso`)
//! - [`HierarchyEvent`] - domain events published after commits

#[cfg(feature = "turso")]
mod error;
pub mod events;
mod hierarchy_store;
mod memory_store;
#[cfg(feature = "turso")]
mod turso_store;

#[cfg(feature = "turso")]
pub use error::DatabaseError;
pub use events::{HierarchyEvent, PathRewrite};
pub use hierarchy_store::{
    CommitReceipt, Guard, HierarchyStore, HierarchyTransaction, StoreError, WriteOp,
};
pub use memory_store::MemoryStore;
#[cfg(feature = "turso")]
pub use turso_store::TursoStore;
