//! Local store boundary.
//!
//! The physical storage engine is consumed through two traits:
//! [`StoreBackend`] opens (and deletes) named databases, and the
//! [`StoreHandle`] it returns performs per-table reads and writes.
//!
//! Opening is two-phase. [`StoreBackend::open`] reports the previously
//! committed schema version; the caller creates any missing tables and then
//! commits the new version with [`StoreHandle::commit_version`].
//!
//! Every call may fail with [`Error::StorageFailure`](crate::Error::StorageFailure).
//! Failures are never retried here.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{error::Result, Identity, Record, SchemaVersion, TableName, TableSpec};

/// Result of opening a database.
#[derive(Clone)]
pub struct OpenedStore {
    /// Handle for table operations
    pub handle: Arc<dyn StoreHandle>,
    /// Version committed before this open, `None` for a fresh database
    pub previous_version: Option<SchemaVersion>,
}

impl OpenedStore {
    /// Whether opening at `version` requires the upgrade step.
    pub fn needs_upgrade(&self, version: SchemaVersion) -> bool {
        self.previous_version.map_or(true, |previous| previous < version)
    }
}

impl std::fmt::Debug for OpenedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedStore")
            .field("previous_version", &self.previous_version)
            .finish_non_exhaustive()
    }
}

/// A storage engine that hosts named, versioned databases.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Backend name for logging (e.g. "memory").
    fn name(&self) -> &str;

    /// Open (or create) a database.
    ///
    /// # Errors
    /// - `version` is lower than the committed version
    /// - Underlying I/O errors
    async fn open(&self, database: &str, version: SchemaVersion) -> Result<OpenedStore>;

    /// Remove a database and all its tables. Missing databases are not an error.
    async fn delete_database(&self, database: &str) -> Result<()>;
}

/// Per-database handle for table operations.
#[async_trait]
pub trait StoreHandle: Send + Sync {
    /// Names of the tables that physically exist.
    async fn table_names(&self) -> Result<Vec<TableName>>;

    /// Create a table unless it already exists.
    ///
    /// Returns `true` when the table was created. An existing table with a
    /// different key strategy is an error: tables are never altered.
    async fn create_table_if_missing(&self, spec: &TableSpec) -> Result<bool>;

    /// Commit the schema version after an upgrade.
    async fn commit_version(&self, version: SchemaVersion) -> Result<()>;

    /// Insert or replace a record, returning the identity it was stored under.
    ///
    /// Key-path tables read the key from the payload. Auto-increment tables
    /// use the record's identity if bound, otherwise assign the next key.
    async fn put(&self, table: &str, record: &Record) -> Result<Identity>;

    /// Read one record. Absence is `Ok(None)`.
    async fn get(&self, table: &str, identity: &Identity) -> Result<Option<Record>>;

    /// Read every record of a table from one consistent view.
    async fn get_all(&self, table: &str) -> Result<Vec<Record>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[tokio::test]
    async fn fresh_database_needs_upgrade() {
        let store = MemoryStore::new();
        let opened = store.open("app", 1).await.unwrap();

        assert_eq!(opened.previous_version, None);
        assert!(opened.needs_upgrade(1));
    }

    #[tokio::test]
    async fn committed_version_skips_upgrade() {
        let store = MemoryStore::new();
        let opened = store.open("app", 1).await.unwrap();
        opened.handle.commit_version(1).await.unwrap();

        let reopened = store.open("app", 1).await.unwrap();
        assert_eq!(reopened.previous_version, Some(1));
        assert!(!reopened.needs_upgrade(1));
        assert!(reopened.needs_upgrade(2));
    }
}
