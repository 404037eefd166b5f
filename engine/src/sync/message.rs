use crate::{Record, TableName};
use serde::{Deserialize, Serialize};

/// A batch of records for one table, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    pub table: TableName,
    #[serde(default)]
    pub items: Vec<Record>,
}

impl SyncMessage {
    pub fn new(table: impl Into<TableName>, items: Vec<Record>) -> Self {
        Self {
            table: table.into(),
            items,
        }
    }

    pub fn empty(table: impl Into<TableName>) -> Self {
        Self::new(table, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
