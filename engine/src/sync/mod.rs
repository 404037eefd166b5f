//! Synchronization with a remote authority.
//!
//! A sync exchange sends the unsynced records of one table as a
//! [`SyncMessage`] and receives the authority's canonical view of that
//! table in return. Transports implement [`SyncAdapter`].

mod adapter;
mod http;
mod message;
mod protocol;
mod websocket;

pub use adapter::SyncAdapter;
pub use http::{HttpAdapter, HttpAdapterConfig};
pub use message::SyncMessage;
pub use protocol::{ClientFrame, ServerFrame};
pub use websocket::{WebSocketAdapter, WebSocketConfig};
