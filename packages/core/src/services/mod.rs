//! Business Services
//!
//! - `HierarchyService` - create, move, delete and query organizations
//! - `QueryEngine` - descendant/ancestor reads on top of the store
//! - `HierarchyCache` - per-root cache of subtree views
//! - `ReferenceLookup` - read-only industry catalogue used for inheritance
//!
//! Services enforce the hierarchy rules; the database layer only persists
//! what they plan.

pub mod error;
pub mod hierarchy_cache;
pub mod hierarchy_service;
pub mod query_engine;
pub mod reference_data;

pub use error::HierarchyServiceError;
pub use hierarchy_cache::{CacheStats, HierarchyCache};
pub use hierarchy_service::{HierarchyConfig, HierarchyService};
pub use query_engine::QueryEngine;
pub use reference_data::{Industry, ReferenceLookup, StaticReferenceData};
