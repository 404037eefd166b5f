//! WebSocket support for real-time sync.
//!
//! Clients hold one connection for all tables. Besides request-reply sync
//! frames, the server pushes records accepted from other clients.

mod manager;

pub use manager::{ConnectionManager, FrameSender};
