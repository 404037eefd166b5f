//! Sync handler.

use tablesync_engine::{ServerFrame, SyncMessage};

use crate::error::Result;
use crate::AppState;

/// Reconcile a client's message and return the table's canonical view.
///
/// Accepted records are pushed to every WebSocket connection except
/// `origin`, the connection the message arrived on (if any).
pub fn handle_sync(state: &AppState, message: SyncMessage, origin: Option<&str>) -> Result<SyncMessage> {
    let table = message.table.clone();
    let received = message.items.len();

    let outcome = state.authority.reconcile(message)?;

    let accepted = outcome.changed.len();
    if accepted > 0 {
        let push = ServerFrame::push(SyncMessage::new(table.clone(), outcome.changed));
        let sent = match origin {
            Some(conn_id) => state.conn_manager.broadcast_except(conn_id, push),
            None => state.conn_manager.broadcast_all(push),
        };
        tracing::debug!(table = %table, accepted, sent_to = sent, "Pushed accepted records");
    }

    tracing::info!(
        table = %table,
        received,
        accepted,
        returned = outcome.reply.items.len(),
        "Sync handled"
    );

    Ok(outcome.reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;
    use tablesync_engine::Record;
    use tokio::sync::mpsc;

    #[test]
    fn accepted_records_are_pushed_to_others() {
        let state = AppState::new(Config::default());
        let (origin_tx, mut origin_rx) = mpsc::unbounded_channel();
        let (other_tx, mut other_rx) = mpsc::unbounded_channel();
        let origin = state.conn_manager.register(origin_tx);
        state.conn_manager.register(other_tx);

        let item = Record::with_identity("a", json!({"id": "a"})).updated(1);
        let reply = handle_sync(&state, SyncMessage::new("notes", vec![item]), Some(&origin)).unwrap();

        assert_eq!(reply.items.len(), 1);
        assert!(origin_rx.try_recv().is_err());
        match other_rx.try_recv().unwrap() {
            ServerFrame::Push { table, items } => {
                assert_eq!(table, "notes");
                assert_eq!(items.len(), 1);
            }
            frame => panic!("Expected Push frame, got {:?}", frame),
        }
    }

    #[test]
    fn nothing_accepted_nothing_pushed() {
        let state = AppState::new(Config::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.conn_manager.register(tx);

        handle_sync(&state, SyncMessage::empty("notes"), None).unwrap();
        assert!(rx.try_recv().is_err());
    }
}
