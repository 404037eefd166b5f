//! Request handlers shared by the HTTP and WebSocket transports.

mod sync;
mod websocket;

pub use sync::handle_sync;
pub use websocket::handle_websocket_connection;
