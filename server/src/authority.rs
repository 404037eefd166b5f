//! Canonical record store.
//!
//! The authority keeps one canonical copy of every record, per table, keyed
//! by identity. Incoming items are accepted last-writer-wins by
//! `updated_at`; on a tie the canonical copy stays. Every reply carries the
//! full canonical view of the table with `syncedIdentity` assigned.

use std::collections::BTreeMap;

use dashmap::DashMap;
use tablesync_engine::{Identity, Record, SyncMessage, TableName};

/// Errors raised while reconciling a sync message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthorityError {
    #[error("item {index} of table '{table}' has no identity")]
    MissingIdentity { table: TableName, index: usize },

    #[error("table name is required")]
    MissingTable,
}

/// Result of reconciling one message.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    /// Canonical view of the table, returned to the sender
    pub reply: SyncMessage,
    /// Items accepted from this message, pushed to other clients
    pub changed: Vec<Record>,
}

#[derive(Debug, Default)]
pub struct Authority {
    tables: DashMap<TableName, BTreeMap<Identity, Record>>,
}

impl Authority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept newer items and return the table's canonical view.
    ///
    /// The message is validated before anything is stored.
    pub fn reconcile(&self, message: SyncMessage) -> Result<SyncOutcome, AuthorityError> {
        if message.table.is_empty() {
            return Err(AuthorityError::MissingTable);
        }

        let mut keyed = Vec::with_capacity(message.items.len());
        for (index, item) in message.items.into_iter().enumerate() {
            let key = item
                .synced_identity
                .clone()
                .or_else(|| item.identity.clone())
                .ok_or_else(|| AuthorityError::MissingIdentity {
                    table: message.table.clone(),
                    index,
                })?;
            keyed.push((key, item));
        }

        let mut table = self.tables.entry(message.table.clone()).or_default();
        let mut changed = Vec::new();
        for (key, mut item) in keyed {
            let newer = table
                .get(&key)
                .map_or(true, |canonical| item.updated_at > canonical.updated_at);
            if !newer {
                continue;
            }

            item.identity = Some(key.clone());
            item.mark_synced(key.clone());
            table.insert(key, item.clone());
            changed.push(item);
        }

        let items = table.values().cloned().collect();
        drop(table);

        Ok(SyncOutcome {
            reply: SyncMessage::new(message.table, items),
            changed,
        })
    }

    /// Canonical records of a table.
    pub fn records(&self, table: &str) -> Vec<Record> {
        self.tables
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn record_count(&self) -> usize {
        self.tables.iter().map(|t| t.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn note(id: &str, text: &str, updated_at: u64) -> Record {
        Record::with_identity(id, json!({"id": id, "text": text})).updated(updated_at)
    }

    #[test]
    fn accepts_new_records_and_assigns_synced_identity() {
        let authority = Authority::new();

        let outcome = authority
            .reconcile(SyncMessage::new("notes", vec![note("a", "hi", 10)]))
            .unwrap();

        assert_eq!(outcome.changed.len(), 1);
        assert_eq!(outcome.reply.items.len(), 1);
        assert_eq!(
            outcome.reply.items[0].synced_identity,
            Some(Identity::from("a"))
        );
        assert_eq!(authority.record_count(), 1);
    }

    #[test]
    fn newer_item_replaces_canonical() {
        let authority = Authority::new();
        authority
            .reconcile(SyncMessage::new("notes", vec![note("a", "old", 10)]))
            .unwrap();

        let outcome = authority
            .reconcile(SyncMessage::new("notes", vec![note("a", "new", 20)]))
            .unwrap();

        assert_eq!(outcome.changed.len(), 1);
        assert_eq!(authority.records("notes")[0].payload["text"], "new");
    }

    #[test]
    fn tie_and_older_keep_canonical() {
        let authority = Authority::new();
        authority
            .reconcile(SyncMessage::new("notes", vec![note("a", "canonical", 10)]))
            .unwrap();

        for updated_at in [10, 5] {
            let outcome = authority
                .reconcile(SyncMessage::new("notes", vec![note("a", "stale", updated_at)]))
                .unwrap();

            assert!(outcome.changed.is_empty());
            assert_eq!(outcome.reply.items[0].payload["text"], "canonical");
        }
    }

    #[test]
    fn reply_includes_records_the_sender_lacks() {
        let authority = Authority::new();
        authority
            .reconcile(SyncMessage::new("notes", vec![note("a", "x", 1)]))
            .unwrap();

        let outcome = authority.reconcile(SyncMessage::empty("notes")).unwrap();

        assert!(outcome.changed.is_empty());
        assert_eq!(outcome.reply.items.len(), 1);
    }

    #[test]
    fn synced_identity_takes_precedence() {
        let authority = Authority::new();
        let mut item = Record::with_identity(Identity::Int(7), json!({"n": 1})).updated(3);
        item.synced_identity = Some(Identity::Int(42));

        let outcome = authority
            .reconcile(SyncMessage::new("events", vec![item]))
            .unwrap();

        assert_eq!(outcome.reply.items[0].identity, Some(Identity::Int(42)));
    }

    #[test]
    fn item_without_identity_is_rejected_atomically() {
        let authority = Authority::new();

        let result = authority.reconcile(SyncMessage::new(
            "notes",
            vec![note("a", "x", 1), Record::new(json!({}))],
        ));

        assert_eq!(
            result.unwrap_err(),
            AuthorityError::MissingIdentity {
                table: "notes".to_string(),
                index: 1
            }
        );
        assert_eq!(authority.record_count(), 0);
    }

    #[test]
    fn empty_table_name_is_rejected() {
        let authority = Authority::new();
        assert_eq!(
            authority.reconcile(SyncMessage::empty("")).unwrap_err(),
            AuthorityError::MissingTable
        );
    }

    #[test]
    fn tables_are_independent() {
        let authority = Authority::new();
        authority
            .reconcile(SyncMessage::new("notes", vec![note("a", "x", 1)]))
            .unwrap();
        authority
            .reconcile(SyncMessage::new("drafts", vec![note("a", "y", 1)]))
            .unwrap();

        assert_eq!(authority.table_count(), 2);
        assert_eq!(authority.records("drafts")[0].payload["text"], "y");
        assert!(authority.records("missing").is_empty());
    }
}
