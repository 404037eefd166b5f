//! Snapshot types for persisting and restoring store state.
//!
//! Snapshots are the bridge between the in-memory store and persistent
//! storage. Tables are kept sorted by name and records by identity so the
//! same state always serializes to the same bytes.

use std::path::Path;

use crate::{
    error::{Result, StoreOp},
    Error, Record, SchemaVersion, TableSpec,
};
use serde::{Deserialize, Serialize};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of one database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Database name
    pub database: String,
    /// Committed schema version
    pub schema_version: SchemaVersion,
    /// Tables sorted by name
    pub tables: Vec<TableSnapshot>,
}

/// One table inside a snapshot.
///
/// Records are a list rather than a map because identities can be integers,
/// which JSON object keys cannot represent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSnapshot {
    pub spec: TableSpec,
    /// Next auto-increment key
    pub next_key: u64,
    /// Records sorted by identity
    pub records: Vec<Record>,
}

fn snapshot_error(message: impl Into<String>) -> Error {
    Error::storage(StoreOp::Snapshot, message)
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new(database: impl Into<String>, schema_version: SchemaVersion) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            database: database.into(),
            schema_version,
            tables: Vec::new(),
        }
    }

    /// Add a table, keeping tables and records in canonical order.
    pub fn add_table(&mut self, mut table: TableSnapshot) {
        table.records.sort_by(|a, b| a.identity.cmp(&b.identity));
        let position = self
            .tables
            .binary_search_by(|t| t.spec.name.cmp(&table.spec.name))
            .unwrap_or_else(|p| p);
        match self.tables.get(position) {
            Some(existing) if existing.spec.name == table.spec.name => {
                self.tables[position] = table;
            }
            _ => self.tables.insert(position, table),
        }
    }

    /// Get a table by name.
    pub fn table(&self, name: &str) -> Option<&TableSnapshot> {
        self.tables.iter().find(|t| t.spec.name == name)
    }

    /// Count total records across all tables.
    pub fn record_count(&self) -> usize {
        self.tables.iter().map(|t| t.records.len()).sum()
    }

    /// Count records not yet confirmed by the authority.
    pub fn unsynced_count(&self) -> usize {
        self.tables
            .iter()
            .flat_map(|t| t.records.iter())
            .filter(|r| !r.is_synced())
            .count()
    }

    /// Check that every record is bound to an identity.
    pub fn validate(&self) -> Result<()> {
        if self.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(snapshot_error(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                self.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        for table in &self.tables {
            if let Some(position) = table.records.iter().position(|r| r.identity.is_none()) {
                return Err(snapshot_error(format!(
                    "record {} of table '{}' has no identity",
                    position, table.spec.name
                )));
            }
        }

        Ok(())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| snapshot_error(e.to_string()))
    }

    /// Serialize to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| snapshot_error(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self = serde_json::from_str(json).map_err(|e| snapshot_error(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Write the snapshot to a file.
    pub async fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = self.to_json_pretty()?;
        tokio::fs::write(path.as_ref(), json)
            .await
            .map_err(|e| snapshot_error(format!("{}: {}", path.as_ref().display(), e)))?;

        tracing::debug!(
            database = %self.database,
            records = self.record_count(),
            path = %path.as_ref().display(),
            "Snapshot written"
        );
        Ok(())
    }

    /// Read a snapshot from a file.
    pub async fn read_from(path: impl AsRef<Path>) -> Result<Self> {
        let json = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| snapshot_error(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_json(&json)
    }
}
