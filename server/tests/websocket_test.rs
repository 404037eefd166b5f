//! Integration tests for the WebSocket sync endpoint.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{eventually, open_notes, TestServer};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tablesync_engine::{
    Connectivity, HttpAdapter, HttpAdapterConfig, Identity, Record, ServerFrame, SyncAdapter,
    SyncMessage, WebSocketAdapter, WebSocketConfig,
};
use tablesync_server::config::Config;
use tokio_tungstenite::{connect_async, tungstenite::Message};

fn ws_adapter(server: &TestServer) -> Arc<WebSocketAdapter> {
    Arc::new(WebSocketAdapter::new(WebSocketConfig::new(server.ws_url())))
}

/// Send one text frame and decode the next reply.
async fn round_trip(server: &TestServer, text: &str) -> ServerFrame {
    let (mut socket, _) = connect_async(server.ws_url()).await.unwrap();
    socket.send(Message::Text(text.to_string().into())).await.unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match reply {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("Expected text frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ping_gets_pong() {
    let server = TestServer::start(Config::default()).await;
    assert_eq!(round_trip(&server, r#"{"type": "ping"}"#).await, ServerFrame::Pong);
}

#[tokio::test]
async fn test_invalid_frame_gets_error() {
    let server = TestServer::start(Config::default()).await;

    match round_trip(&server, r#"{"type": "launch"}"#).await {
        ServerFrame::Error { table, message, .. } => {
            assert!(table.is_none());
            assert!(message.starts_with("Invalid frame"));
        }
        frame => panic!("Expected Error frame, got {:?}", frame),
    }
}

#[tokio::test]
async fn test_adapter_round_trip() {
    let server = TestServer::start(Config::default()).await;
    let adapter = ws_adapter(&server);

    let item = Record::with_identity("a", json!({"id": "a", "text": "hi"})).updated(4);
    let reply = adapter
        .synchronize(SyncMessage::new("notes", vec![item]))
        .await
        .unwrap();

    assert_eq!(reply.table, "notes");
    assert_eq!(reply.items.len(), 1);
    assert_eq!(reply.items[0].synced_identity, Some(Identity::from("a")));
    assert_eq!(server.state.authority.record_count(), 1);
}

#[tokio::test]
async fn test_rejected_sync_fails_only_that_request() {
    let server = TestServer::start(Config::default()).await;
    let adapter = ws_adapter(&server);

    let bad = SyncMessage::new("notes", vec![Record::new(json!({"text": "no id"}))]);
    assert!(adapter.synchronize(bad).await.is_err());

    let reply = adapter.synchronize(SyncMessage::empty("notes")).await.unwrap();
    assert!(reply.is_empty());
}

#[tokio::test]
async fn test_change_is_pushed_to_other_database() {
    let server = TestServer::start(Config::default()).await;
    let (writer_db, writer) = open_notes("writer", ws_adapter(&server), Connectivity::default()).await;
    let (reader_db, reader) = open_notes("reader", ws_adapter(&server), Connectivity::default()).await;
    writer_db.settle().await;
    reader_db.settle().await;

    let state = &server.state;
    assert!(eventually(|| async move { state.conn_manager.connection_count() == 2 }).await);

    writer
        .put(Record::new(json!({"id": "a", "text": "pushed"})))
        .await
        .unwrap();

    let table = &reader;
    assert!(eventually(|| async move {
        table.get(&Identity::from("a")).await.unwrap().is_some()
    })
    .await);

    let record = reader.get(&Identity::from("a")).await.unwrap().unwrap();
    assert_eq!(record.payload["text"], "pushed");
    assert!(record.is_synced());
    assert_eq!(reader.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_http_sync_is_pushed_to_websocket_clients() {
    let server = TestServer::start(Config::default()).await;
    let adapter = ws_adapter(&server);
    let mut pushes = adapter.subscribe_pushes().unwrap();
    adapter.initialize().await.unwrap();

    let state = &server.state;
    assert!(eventually(|| async move { state.conn_manager.connection_count() == 1 }).await);

    let http = HttpAdapter::new(HttpAdapterConfig::new(server.sync_url())).unwrap();
    let item = Record::with_identity("a", json!({"id": "a"})).updated(1);
    http.synchronize(SyncMessage::new("notes", vec![item]))
        .await
        .unwrap();

    let push = tokio::time::timeout(Duration::from_secs(2), pushes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(push.table, "notes");
    assert_eq!(push.items[0].identity, Some(Identity::from("a")));
}

#[tokio::test]
async fn test_upgrade_requires_token_when_secret_set() {
    let server = TestServer::start(Config::default().with_auth_secret("s3cret")).await;

    let anonymous = ws_adapter(&server);
    assert!(anonymous.synchronize(SyncMessage::empty("notes")).await.is_err());
    assert!(!anonymous.is_connected().await);

    let authorized = WebSocketAdapter::new(
        WebSocketConfig::new(server.ws_url()).with_bearer_token("s3cret"),
    );
    let reply = authorized
        .synchronize(SyncMessage::empty("notes"))
        .await
        .unwrap();
    assert!(reply.is_empty());
}

#[tokio::test]
async fn test_disconnect_unregisters_connection() {
    let server = TestServer::start(Config::default()).await;
    let adapter = ws_adapter(&server);
    adapter.initialize().await.unwrap();

    let state = &server.state;
    assert!(eventually(|| async move { state.conn_manager.connection_count() == 1 }).await);

    adapter.disconnect().await;
    assert!(eventually(|| async move { state.conn_manager.connection_count() == 0 }).await);
}
