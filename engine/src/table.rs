//! Table handles.

use std::sync::Arc;

use crate::{error::Result, Database, Error, Identity, Record, TableSpec};

/// Handle for reading and writing one table.
///
/// Obtained from [`Database::register_table`]. Cheap to clone. Every call
/// fails with [`Error::NotOpen`] until the database is open.
#[derive(Debug, Clone)]
pub struct Table {
    db: Database,
    spec: Arc<TableSpec>,
}

impl Table {
    pub(crate) fn new(db: Database, spec: Arc<TableSpec>) -> Self {
        Self { db, spec }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Upsert a record and return the stored copy.
    ///
    /// The stored copy carries the store-assigned (or payload-derived)
    /// identity, a fresh `updated_at` and no synced identity. When an
    /// adapter is configured and the database is online, the record is then
    /// sent to the authority in the background; sync failures never fail
    /// the write.
    ///
    /// # Errors
    /// - `IdentityConflict` if the payload key differs from the bound identity
    /// - `InvalidKey` if a key-path table's payload has no usable key
    /// - `StorageFailure` from the local store
    pub async fn put(&self, record: Record) -> Result<Record> {
        let handle = self.db.handle()?;

        let derived = self.spec.extract_key(&record.payload)?;
        if let (Some(bound), Some(key)) = (&record.identity, &derived) {
            if bound != key {
                return Err(Error::IdentityConflict {
                    bound: bound.clone(),
                    attempted: key.clone(),
                });
            }
        }

        let stored = {
            let gate = self.db.write_gate(&self.spec.name);
            let _guard = gate.lock().await;

            let mut stored = record;
            stored.touch(self.db.now());
            if let Some(key) = derived {
                stored.identity = Some(key);
            }

            let identity = handle.put(&self.spec.name, &stored).await?;
            stored.bind_identity(identity)?;
            stored
        };

        tracing::trace!(table = %self.spec.name, identity = ?stored.identity, "Record written");
        self.db.after_write(&self.spec, stored.clone()).await;
        Ok(stored)
    }

    /// Upsert a record in place, binding its identity on first save.
    pub async fn save(&self, record: &mut Record) -> Result<()> {
        *record = self.put(record.clone()).await?;
        Ok(())
    }

    /// Read one record. Absence is `Ok(None)`.
    pub async fn get(&self, identity: &Identity) -> Result<Option<Record>> {
        self.db.handle()?.get(&self.spec.name, identity).await
    }

    /// Read every record in identity order.
    pub async fn get_all(&self) -> Result<Vec<Record>> {
        self.db.handle()?.get_all(&self.spec.name).await
    }

    /// Records not yet confirmed by the authority.
    pub async fn get_unsynced(&self) -> Result<Vec<Record>> {
        let records = self.get_all().await?;
        Ok(records.into_iter().filter(|r| !r.is_synced()).collect())
    }

    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self.get_unsynced().await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DatabaseConfig, ManualClock, MemoryStore};
    use serde_json::json;

    async fn open_table(spec: TableSpec) -> (Table, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let db = Database::builder(DatabaseConfig::new("app"), Arc::new(MemoryStore::new()))
            .clock(clock.clone())
            .build();
        let table = db.register_table(spec).unwrap();
        db.listen().await.unwrap();
        (table, clock)
    }

    #[tokio::test]
    async fn save_binds_identity_and_timestamp() {
        let (events, clock) = open_table(TableSpec::auto_increment("events")).await;

        let mut record = Record::new(json!({"kind": "click"}));
        events.save(&mut record).await.unwrap();

        assert_eq!(record.identity, Some(Identity::Int(1)));
        assert_eq!(record.updated_at, 1_000);
        assert!(!record.is_synced());

        clock.advance(5);
        record.payload = json!({"kind": "double-click"});
        events.save(&mut record).await.unwrap();

        assert_eq!(record.identity, Some(Identity::Int(1)));
        assert_eq!(record.updated_at, 1_005);
        assert_eq!(events.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn save_then_get_before_sync() {
        let (notes, _) = open_table(TableSpec::with_key_path("notes", "id")).await;

        let mut note = Record::new(json!({"id": "a", "text": "hi"}));
        notes.save(&mut note).await.unwrap();

        let fetched = notes.get(&Identity::from("a")).await.unwrap().unwrap();
        assert_eq!(fetched.payload, json!({"id": "a", "text": "hi"}));
        assert_eq!(fetched.synced_identity, None);
    }

    #[tokio::test]
    async fn local_write_clears_synced_marker() {
        let (notes, _) = open_table(TableSpec::with_key_path("notes", "id")).await;

        let mut note = Record::new(json!({"id": "a"}));
        note.mark_synced(Identity::from("a"));
        notes.save(&mut note).await.unwrap();

        assert!(!note.is_synced());
        assert_eq!(notes.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn changing_key_path_value_is_identity_conflict() {
        let (notes, _) = open_table(TableSpec::with_key_path("notes", "id")).await;

        let mut note = Record::new(json!({"id": "a"}));
        notes.save(&mut note).await.unwrap();

        note.payload = json!({"id": "b"});
        let result = notes.save(&mut note).await;

        assert!(matches!(result, Err(Error::IdentityConflict { .. })));
        assert!(notes.get(&Identity::from("b")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_key_field_is_invalid_key() {
        let (notes, _) = open_table(TableSpec::with_key_path("notes", "id")).await;

        let result = notes.put(Record::new(json!({"text": "no id"}))).await;
        assert!(matches!(result, Err(Error::InvalidKey { .. })));
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let (events, _) = open_table(TableSpec::auto_increment("events")).await;
        assert!(events.get(&Identity::Int(42)).await.unwrap().is_none());
    }
}
