//! In-memory storage backend.
//!
//! Databases live for as long as the [`MemoryStore`] does. Use
//! [`MemoryStore::export_snapshot`] / [`MemoryStore::import_snapshot`] to
//! persist them across processes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Result, StoreOp};
use crate::snapshot::{StoreSnapshot, TableSnapshot};
use crate::store::{OpenedStore, StoreBackend, StoreHandle};
use crate::{Error, Identity, KeyStrategy, Record, SchemaVersion, TableName, TableSpec};

/// A physical table.
#[derive(Debug)]
struct TableData {
    spec: TableSpec,
    /// Next auto-increment key
    next_key: u64,
    records: BTreeMap<Identity, Record>,
}

impl TableData {
    fn new(spec: TableSpec) -> Self {
        Self {
            spec,
            next_key: 1,
            records: BTreeMap::new(),
        }
    }

    fn resolve_key(&mut self, record: &Record) -> Result<Identity> {
        match &self.spec.key_strategy {
            KeyStrategy::KeyPath(_) => self
                .spec
                .extract_key(&record.payload)
                .map_err(|e| Error::storage(StoreOp::Put, e.to_string()))?
                .ok_or_else(|| Error::storage(StoreOp::Put, "key path produced no key")),
            KeyStrategy::AutoIncrement => match &record.identity {
                Some(identity) => {
                    if let Identity::Int(n) = identity {
                        self.next_key = self.next_key.max(n.saturating_add(1));
                    }
                    Ok(identity.clone())
                }
                None => {
                    let key = self.next_key;
                    self.next_key += 1;
                    Ok(Identity::Int(key))
                }
            },
        }
    }
}

/// A physical database.
#[derive(Debug, Default)]
struct DatabaseData {
    /// Committed schema version, `None` until the first commit
    version: Option<SchemaVersion>,
    tables: HashMap<TableName, TableData>,
}

type SharedDatabase = Arc<RwLock<DatabaseData>>;

/// In-memory storage backend.
///
/// Useful for tests and for clients that persist via snapshots. Each
/// database is guarded by its own lock, so a write transaction completes
/// before the next read on the same database observes the store.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    databases: Arc<RwLock<HashMap<String, SharedDatabase>>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Export one database as a snapshot.
    pub async fn export_snapshot(&self, database: &str) -> Result<StoreSnapshot> {
        let shared = self
            .databases
            .read()
            .await
            .get(database)
            .cloned()
            .ok_or_else(|| {
                Error::storage(StoreOp::Snapshot, format!("no such database: {}", database))
            })?;
        let data = shared.read().await;

        let mut snapshot = StoreSnapshot::new(database, data.version.unwrap_or(0));
        for table in data.tables.values() {
            snapshot.add_table(TableSnapshot {
                spec: table.spec.clone(),
                next_key: table.next_key,
                records: table.records.values().cloned().collect(),
            });
        }
        Ok(snapshot)
    }

    /// Replace (or create) a database from a snapshot.
    pub async fn import_snapshot(&self, snapshot: StoreSnapshot) -> Result<()> {
        snapshot.validate()?;

        let mut data = DatabaseData {
            version: Some(snapshot.schema_version),
            tables: HashMap::new(),
        };
        for table in snapshot.tables {
            let mut table_data = TableData::new(table.spec);
            table_data.next_key = table.next_key;
            for record in table.records {
                if let Some(identity) = record.identity.clone() {
                    table_data.records.insert(identity, record);
                }
            }
            data.tables.insert(table_data.spec.name.clone(), table_data);
        }

        self.databases
            .write()
            .await
            .insert(snapshot.database, Arc::new(RwLock::new(data)));
        Ok(())
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn open(&self, database: &str, version: SchemaVersion) -> Result<OpenedStore> {
        let shared = self
            .databases
            .write()
            .await
            .entry(database.to_string())
            .or_default()
            .clone();

        let previous_version = shared.read().await.version;
        if let Some(committed) = previous_version {
            if version < committed {
                return Err(Error::storage(
                    StoreOp::Open,
                    format!(
                        "requested version {} is lower than committed version {}",
                        version, committed
                    ),
                ));
            }
        }

        Ok(OpenedStore {
            handle: Arc::new(MemoryHandle { data: shared }),
            previous_version,
        })
    }

    async fn delete_database(&self, database: &str) -> Result<()> {
        self.databases.write().await.remove(database);
        Ok(())
    }
}

/// Handle onto one in-memory database.
#[derive(Debug)]
struct MemoryHandle {
    data: SharedDatabase,
}

fn missing_table(op: StoreOp, table: &str) -> Error {
    Error::storage(op, format!("no such table: {}", table))
}

#[async_trait]
impl StoreHandle for MemoryHandle {
    async fn table_names(&self) -> Result<Vec<TableName>> {
        let mut names: Vec<_> = self.data.read().await.tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_table_if_missing(&self, spec: &TableSpec) -> Result<bool> {
        let mut data = self.data.write().await;
        match data.tables.get(&spec.name) {
            Some(existing) if existing.spec.key_strategy != spec.key_strategy => {
                Err(Error::storage(
                    StoreOp::CreateTable,
                    format!(
                        "table '{}' exists with {}, cannot change to {}",
                        spec.name, existing.spec.key_strategy, spec.key_strategy
                    ),
                ))
            }
            Some(_) => Ok(false),
            None => {
                data.tables
                    .insert(spec.name.clone(), TableData::new(spec.clone()));
                Ok(true)
            }
        }
    }

    async fn commit_version(&self, version: SchemaVersion) -> Result<()> {
        self.data.write().await.version = Some(version);
        Ok(())
    }

    async fn put(&self, table: &str, record: &Record) -> Result<Identity> {
        let mut data = self.data.write().await;
        let table_data = data
            .tables
            .get_mut(table)
            .ok_or_else(|| missing_table(StoreOp::Put, table))?;

        let key = table_data.resolve_key(record)?;
        let mut stored = record.clone();
        stored.identity = Some(key.clone());
        table_data.records.insert(key.clone(), stored);
        Ok(key)
    }

    async fn get(&self, table: &str, identity: &Identity) -> Result<Option<Record>> {
        let data = self.data.read().await;
        let table_data = data
            .tables
            .get(table)
            .ok_or_else(|| missing_table(StoreOp::Get, table))?;
        Ok(table_data.records.get(identity).cloned())
    }

    async fn get_all(&self, table: &str) -> Result<Vec<Record>> {
        let data = self.data.read().await;
        let table_data = data
            .tables
            .get(table)
            .ok_or_else(|| missing_table(StoreOp::GetAll, table))?;
        Ok(table_data.records.values().cloned().collect())
    }
}
