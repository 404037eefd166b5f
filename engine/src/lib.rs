//! # tablesync engine
//!
//! Offline-first, versioned storage of records organized into named tables,
//! with optional background synchronization against a remote authority.
//!
//! The local store stays fully usable while disconnected. Every local write
//! marks the record as unsynced; sync sweeps push unsynced records through a
//! [`SyncAdapter`] and merge the authority's reply back into the store.
//!
//! ## Core Concepts
//!
//! ### Records and Tables
//!
//! A [`Record`] carries:
//! - An identity ([`Identity`]), assigned by the store or derived from the payload
//! - A JSON payload
//! - An `updated_at` timestamp in milliseconds, refreshed on every local write
//! - A `synced_identity`, present once the authority has confirmed the record
//!
//! A [`TableSpec`] names a table and fixes its [`KeyStrategy`]:
//! - [`KeyStrategy::AutoIncrement`] - the store assigns sequential integer keys
//! - [`KeyStrategy::KeyPath`] - the key is read from a payload field
//!
//! ### Database
//!
//! The [`Database`] registers tables, opens the [`StoreBackend`] (creating any
//! missing tables when the schema version is bumped), hands out [`Table`]
//! handles and drives synchronization:
//! - on open, when an adapter is configured
//! - when [`Connectivity`] goes from offline to online
//! - on [`Database::synchronize`]
//! - optionally on a fixed interval
//!
//! ### Merge
//!
//! Replies are merged last-writer-wins by `updated_at`. A local unsynced record
//! survives only when strictly newer than the returned item; ties go to the
//! authority. See [`merge`].
//!
//! ### Transports
//!
//! - [`HttpAdapter`] - one POST per sync message
//! - [`WebSocketAdapter`] - one shared connection, replies correlated by table
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use tablesync_engine::{Database, DatabaseConfig, Identity, MemoryStore, Record, TableSpec};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = Arc::new(MemoryStore::new());
//! let db = Database::builder(DatabaseConfig::new("app"), store).build();
//!
//! let notes = db.register_table(TableSpec::with_key_path("notes", "id")).unwrap();
//! db.listen().await.unwrap();
//!
//! let mut note = Record::new(json!({"id": "a", "text": "hi"}));
//! notes.save(&mut note).await.unwrap();
//!
//! let fetched = notes.get(&Identity::from("a")).await.unwrap().unwrap();
//! assert_eq!(fetched.payload, json!({"id": "a", "text": "hi"}));
//! assert_eq!(notes.get_unsynced().await.unwrap().len(), 1);
//! # }
//! ```

pub mod clock;
pub mod connectivity;
pub mod database;
pub mod error;
pub mod memory;
pub mod merge;
pub mod record;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod sync;
pub mod table;

// Re-export main types at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use connectivity::Connectivity;
pub use database::{
    Database, DatabaseBuilder, DatabaseConfig, DatabaseState, SyncReport, TableHealth,
    TableSyncOutcome,
};
pub use error::{Error, StoreOp};
pub use memory::MemoryStore;
pub use merge::{MergeStats, Resolution};
pub use record::{Identity, Record};
pub use schema::{KeyStrategy, TableSpec};
pub use snapshot::{StoreSnapshot, TableSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{OpenedStore, StoreBackend, StoreHandle};
pub use sync::{
    ClientFrame, HttpAdapter, HttpAdapterConfig, ServerFrame, SyncAdapter, SyncMessage,
    WebSocketAdapter, WebSocketConfig,
};
pub use table::Table;

/// Type aliases for clarity
pub type TableName = String;
pub type DatabaseName = String;
pub type Timestamp = u64;
pub type SchemaVersion = u32;
