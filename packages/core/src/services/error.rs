//! Service Layer Error Types
//!
//! Every hierarchy failure reaches the caller as one of three structural
//! outcomes (`NotFound`, `InvalidOperation`, `Conflict`) or as an
//! infrastructure failure. None of them is retried inside the service: the
//! caller re-fetches and resubmits.

use crate::db::StoreError;
use crate::models::{PathError, ValidationError};
use thiserror::Error;

/// Hierarchy service errors
#[derive(Error, Debug)]
pub enum HierarchyServiceError {
    /// Referenced organization (target or parent) does not exist
    #[error("Organization not found: {id}")]
    NotFound { id: String },

    /// A structural rule was violated by the request
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A concurrent structural mutation changed the data the request was
    /// planned against
    #[error("Conflicting hierarchy change on {node_id}: {reason}")]
    Conflict { node_id: String, reason: String },

    /// Stored rows or paths violate hierarchy invariants
    #[error("Hierarchy data corrupted: {0}")]
    Corrupted(String),

    /// Storage backend failure
    #[error("Storage operation failed: {0}")]
    Store(StoreError),
}

impl HierarchyServiceError {
    /// Create a not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conflict {
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a corrupted data error
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_invalid_operation(&self) -> bool {
        matches!(self, Self::InvalidOperation(_))
    }

    /// True when re-fetching and resubmitting may succeed
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<StoreError> for HierarchyServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { node_id, reason } => Self::Conflict { node_id, reason },
            StoreError::Corrupted(msg) => Self::Corrupted(msg),
            #[allow(unreachable_patterns)]
            other => Self::Store(other),
        }
    }
}

impl From<PathError> for HierarchyServiceError {
    fn from(err: PathError) -> Self {
        Self::Corrupted(err.to_string())
    }
}

impl From<ValidationError> for HierarchyServiceError {
    fn from(err: ValidationError) -> Self {
        Self::Corrupted(err.to_string())
    }
}
