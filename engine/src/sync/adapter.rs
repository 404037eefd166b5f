use async_trait::async_trait;
use tokio::sync::broadcast;

use super::SyncMessage;
use crate::error::Result;

/// Transport that exchanges a table's unsynced records for the authority's
/// canonical view of that table.
///
/// Implementations never retry; a failed exchange is retried by the next
/// sync trigger.
#[async_trait]
pub trait SyncAdapter: Send + Sync {
    /// Adapter name for logging (e.g. "http").
    fn name(&self) -> &str;

    /// Prepare the transport. Called once when the database opens; failures
    /// are logged and do not prevent opening.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Send one table's records and resolve with the authority's reply.
    async fn synchronize(&self, message: SyncMessage) -> Result<SyncMessage>;

    /// Server-initiated pushes, for transports that support them.
    fn subscribe_pushes(&self) -> Option<broadcast::Receiver<SyncMessage>> {
        None
    }
}
