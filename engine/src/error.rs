//! Error types for the tablesync engine.

use crate::{Identity, TableName};
use std::fmt;
use thiserror::Error;

/// Local store operation that failed, carried by [`Error::StorageFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Open,
    DeleteDatabase,
    CreateTable,
    CommitVersion,
    Put,
    Get,
    GetAll,
    Snapshot,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreOp::Open => "open",
            StoreOp::DeleteDatabase => "delete_database",
            StoreOp::CreateTable => "create_table",
            StoreOp::CommitVersion => "commit_version",
            StoreOp::Put => "put",
            StoreOp::Get => "get",
            StoreOp::GetAll => "get_all",
            StoreOp::Snapshot => "snapshot",
        };
        f.write_str(name)
    }
}

/// All possible errors from the tablesync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Lifecycle errors
    #[error("database is not open")]
    NotOpen,

    #[error("tables must be registered before the database is opened")]
    RegistrationClosed,

    #[error("table already registered: {0}")]
    DuplicateTable(TableName),

    #[error("table not found: {0}")]
    TableNotFound(TableName),

    // Local store errors
    #[error("storage failure during {op}: {message}")]
    StorageFailure { op: StoreOp, message: String },

    #[error("record is bound to identity {bound}, cannot rebind to {attempted}")]
    IdentityConflict { bound: Identity, attempted: Identity },

    #[error("invalid key at path '{path}': {reason}")]
    InvalidKey { path: String, reason: String },

    // Sync errors
    #[error("sync failed: {0}")]
    SyncFailure(String),

    #[error("connection to sync authority lost")]
    ConnectionLost,

    #[error("sync already in flight for table: {0}")]
    SyncInFlight(TableName),

    #[error("sync request timed out after {0} ms")]
    Timeout(u64),
}

impl Error {
    /// Build a [`Error::StorageFailure`] for the given operation.
    pub fn storage(op: StoreOp, message: impl Into<String>) -> Self {
        Error::StorageFailure {
            op,
            message: message.into(),
        }
    }

    /// Build a [`Error::SyncFailure`].
    pub fn sync(message: impl Into<String>) -> Self {
        Error::SyncFailure(message.into())
    }

    /// Whether this error came from the sync path rather than the local store.
    pub fn is_sync_error(&self) -> bool {
        matches!(
            self,
            Error::SyncFailure(_) | Error::ConnectionLost | Error::SyncInFlight(_) | Error::Timeout(_)
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::TableNotFound("notes".into());
        assert_eq!(err.to_string(), "table not found: notes");

        let err = Error::storage(StoreOp::Put, "disk full");
        assert_eq!(err.to_string(), "storage failure during put: disk full");

        let err = Error::IdentityConflict {
            bound: Identity::Int(1),
            attempted: Identity::from("a"),
        };
        assert_eq!(
            err.to_string(),
            "record is bound to identity 1, cannot rebind to a"
        );

        let err = Error::SyncInFlight("notes".into());
        assert_eq!(err.to_string(), "sync already in flight for table: notes");
    }

    #[test]
    fn sync_errors_are_classified() {
        assert!(Error::ConnectionLost.is_sync_error());
        assert!(Error::Timeout(10).is_sync_error());
        assert!(Error::sync("boom").is_sync_error());
        assert!(!Error::NotOpen.is_sync_error());
        assert!(!Error::storage(StoreOp::Get, "io").is_sync_error());
    }
}
