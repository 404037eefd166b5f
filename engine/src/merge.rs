//! Last-writer-wins merge of authority replies.
//!
//! Every item returned by the authority is upserted into the local store
//! and marked synced. When the local copy is still unsynced and strictly
//! newer than the returned item, the local payload is kept; on an exact
//! `updated_at` tie the authority's version wins.

use crate::Record;
use serde::{Deserialize, Serialize};

/// Outcome of merging one returned item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    /// The local unsynced record was newer and keeps its payload
    KeepLocal,
    /// The returned item replaces (or creates) the local record
    TakeRemote,
}

/// Decide which side of a collision survives.
pub fn resolve(local: Option<&Record>, remote: &Record) -> Resolution {
    match local {
        Some(local) if !local.is_synced() && local.updated_at > remote.updated_at => {
            Resolution::KeepLocal
        }
        _ => Resolution::TakeRemote,
    }
}

/// Produce the record to store for a returned item.
///
/// The result is always marked synced, under the authority's
/// `synced_identity` when it sent one, otherwise under the item's identity.
pub fn merge_record(local: Option<&Record>, remote: &Record) -> (Record, Resolution) {
    let resolution = resolve(local, remote);
    let mut merged = match (resolution, local) {
        (Resolution::KeepLocal, Some(local)) => local.clone(),
        _ => remote.clone(),
    };

    if merged.identity.is_none() {
        merged.identity = remote.identity.clone();
    }
    if let Some(synced) = remote.synced_identity.clone().or_else(|| remote.identity.clone()) {
        merged.mark_synced(synced);
    }
    (merged, resolution)
}

/// Counters for one merge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStats {
    /// Items whose payload was taken from the authority
    pub applied_remote: usize,
    /// Items where the newer local payload was kept
    pub kept_local: usize,
}

impl MergeStats {
    pub fn record(&mut self, resolution: Resolution) {
        match resolution {
            Resolution::KeepLocal => self.kept_local += 1,
            Resolution::TakeRemote => self.applied_remote += 1,
        }
    }

    /// Total number of merged items.
    pub fn total(&self) -> usize {
        self.applied_remote + self.kept_local
    }
}
