//! libsql Store Errors
//!
//! Failures of the `org_nodes` database itself: opening the file, creating
//! the schema, running statements, and decoding rows. Guard failures and
//! concurrent inserts of the same id or path are not reported here; the
//! store turns them into `StoreError::Conflict`.

use std::path::PathBuf;
use thiserror::Error;

/// SQLite reports every UNIQUE violation with this prefix (primary key
/// included), e.g. `UNIQUE constraint failed: org_nodes.path`
const UNIQUE_VIOLATION: &str = "UNIQUE constraint failed";

/// Errors raised by `TursoStore`
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Cannot open organization database at {path}: {source}")]
    Open {
        path: PathBuf,
        source: libsql::Error,
    },

    #[error("Cannot create database directory {path}: {source}")]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// `CREATE TABLE` / `CREATE INDEX` failed
    #[error("Failed to create {object}: {source}")]
    Schema {
        object: &'static str,
        source: libsql::Error,
    },

    #[error("PRAGMA '{pragma}' failed: {source}")]
    Pragma {
        pragma: String,
        source: libsql::Error,
    },

    /// A statement against `org_nodes` failed for a reason other than a
    /// uniqueness conflict
    #[error("org_nodes {operation} failed: {source}")]
    Statement {
        operation: &'static str,
        source: libsql::Error,
    },

    /// `BEGIN IMMEDIATE` or `COMMIT` failed
    #[error("Transaction '{label}' failed at {phase}: {source}")]
    Transaction {
        label: &'static str,
        phase: &'static str,
        source: libsql::Error,
    },

    /// A stored column cannot be turned back into a node
    #[error("org_nodes row '{id}' has an unreadable {column}: {reason}")]
    RowDecode {
        id: String,
        column: &'static str,
        reason: String,
    },
}

impl DatabaseError {
    pub fn open(path: PathBuf, source: libsql::Error) -> Self {
        Self::Open { path, source }
    }

    pub fn directory(path: PathBuf, source: std::io::Error) -> Self {
        Self::Directory { path, source }
    }

    pub fn schema(object: &'static str, source: libsql::Error) -> Self {
        Self::Schema { object, source }
    }

    pub fn pragma(pragma: impl Into<String>, source: libsql::Error) -> Self {
        Self::Pragma {
            pragma: pragma.into(),
            source,
        }
    }

    pub fn statement(operation: &'static str, source: libsql::Error) -> Self {
        Self::Statement { operation, source }
    }

    pub fn transaction(label: &'static str, phase: &'static str, source: libsql::Error) -> Self {
        Self::Transaction {
            label,
            phase,
            source,
        }
    }

    pub fn row_decode(
        id: impl Into<String>,
        column: &'static str,
        reason: impl ToString,
    ) -> Self {
        Self::RowDecode {
            id: id.into(),
            column,
            reason: reason.to_string(),
        }
    }

    /// True when the database directory could not be created for lack of
    /// permissions
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            Self::Directory { source, .. } if source.kind() == std::io::ErrorKind::PermissionDenied
        )
    }

    /// True for stored data that no longer decodes (as opposed to an
    /// infrastructure failure)
    pub fn is_row_decode(&self) -> bool {
        matches!(self, Self::RowDecode { .. })
    }
}

/// Whether a libsql error is a UNIQUE constraint violation on `org_nodes`
pub(crate) fn is_unique_violation(err: &libsql::Error) -> bool {
    err.to_string().contains(UNIQUE_VIOLATION)
}
