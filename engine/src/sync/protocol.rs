//! WebSocket frame definitions shared by the adapter and the authority.
//!
//! All frames are JSON-encoded and tagged by a snake_case `type` field.
//! A `sync` frame may carry a `requestId`; the server echoes it on the
//! matching `sync_result` or `error` so late replies can be told apart.

use crate::{Record, TableName};
use serde::{Deserialize, Serialize};

use super::SyncMessage;

/// Frames sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Send unsynced records and request the table's canonical view.
    Sync {
        table: TableName,
        #[serde(default)]
        items: Vec<Record>,
        #[serde(default, rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },

    /// Keep-alive ping.
    Ping,
}

/// Frames sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Reply to a `sync` frame for the same table.
    SyncResult {
        table: TableName,
        items: Vec<Record>,
        #[serde(default, rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },

    /// Records changed by another client.
    Push {
        table: TableName,
        items: Vec<Record>,
    },

    /// Error message, tied to a table when it answers a `sync` frame.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        table: Option<TableName>,
        message: String,
        #[serde(default, rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },

    /// Response to ping.
    Pong,
}

impl ClientFrame {
    pub fn sync(message: SyncMessage, request_id: Option<u64>) -> Self {
        ClientFrame::Sync {
            table: message.table,
            items: message.items,
            request_id,
        }
    }
}

impl ServerFrame {
    /// Create an error frame.
    pub fn error(table: Option<TableName>, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            table,
            message: message.into(),
            request_id: None,
        }
    }

    pub fn sync_result(message: SyncMessage, request_id: Option<u64>) -> Self {
        ServerFrame::SyncResult {
            table: message.table,
            items: message.items,
            request_id,
        }
    }

    /// Tag a reply with the request it answers. Only `sync_result` and
    /// `error` frames carry one.
    pub fn with_request_id(mut self, id: Option<u64>) -> Self {
        match &mut self {
            ServerFrame::SyncResult { request_id, .. } | ServerFrame::Error { request_id, .. } => {
                *request_id = id;
            }
            ServerFrame::Push { .. } | ServerFrame::Pong => {}
        }
        self
    }

    pub fn push(message: SyncMessage) -> Self {
        ServerFrame::Push {
            table: message.table,
            items: message.items,
        }
    }
}
