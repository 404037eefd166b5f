//! Shared helpers for server integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tablesync_engine::{
    Connectivity, Database, DatabaseConfig, MemoryStore, SyncAdapter, Table, TableSpec,
};
use tablesync_server::config::Config;
use tablesync_server::{app, AppState};
use tokio::net::TcpListener;

/// A server bound to an ephemeral local port.
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
}

impl TestServer {
    pub async fn start(config: Config) -> Self {
        let state = AppState::new(config);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let router = app(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn sync_url(&self) -> String {
        self.http_url("/api/sync")
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// Open a database with a `notes` table keyed by `id`.
pub async fn open_notes(
    name: &str,
    adapter: Arc<dyn SyncAdapter>,
    connectivity: Connectivity,
) -> (Database, Table) {
    let db = Database::builder(DatabaseConfig::new(name), Arc::new(MemoryStore::new()))
        .adapter(adapter)
        .connectivity(connectivity)
        .build();
    let notes = db
        .register_table(TableSpec::with_key_path("notes", "id"))
        .unwrap();
    db.listen().await.unwrap();
    (db, notes)
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
