//! Record types for storing data.

use crate::{error::Result, Error, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a record within its table.
///
/// Auto-increment tables produce [`Identity::Int`]; key-path tables use
/// whatever the payload field holds (a string or a non-negative integer).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identity {
    Int(u64),
    Text(String),
}

impl Identity {
    /// Interpret a JSON value as an identity, if it is a valid key.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => Some(Identity::Text(s.clone())),
            serde_json::Value::Number(n) => n.as_u64().map(Identity::Int),
            _ => None,
        }
    }

    /// Convert back into a JSON value.
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Identity::Int(n) => serde_json::Value::from(*n),
            Identity::Text(s) => serde_json::Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Int(n) => write!(f, "{}", n),
            Identity::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for Identity {
    fn from(value: u64) -> Self {
        Identity::Int(value)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Identity::Text(value.to_string())
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Identity::Text(value)
    }
}

/// A record stored in a table.
///
/// The serialized form doubles as the wire encoding of a sync item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Store identity, `None` until the first successful write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    /// Application data
    pub payload: serde_json::Value,
    /// Last local write (milliseconds since epoch)
    #[serde(default)]
    pub updated_at: Timestamp,
    /// Identity confirmed by the sync authority; `None` means unsynced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_identity: Option<Identity>,
}

impl Record {
    /// Create a new, unbound record.
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            identity: None,
            payload,
            updated_at: 0,
            synced_identity: None,
        }
    }

    /// Create a record with a known identity (e.g. an auto-increment key).
    pub fn with_identity(identity: impl Into<Identity>, payload: serde_json::Value) -> Self {
        Self {
            identity: Some(identity.into()),
            ..Self::new(payload)
        }
    }

    /// Builder-style timestamp setter.
    pub fn updated(mut self, updated_at: Timestamp) -> Self {
        self.updated_at = updated_at;
        self
    }

    /// The bound identity, if any.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Whether the authority has confirmed this record.
    pub fn is_synced(&self) -> bool {
        self.synced_identity.is_some()
    }

    /// Bind the store-assigned identity.
    ///
    /// Binding is permanent: rebinding to a different identity fails.
    pub fn bind_identity(&mut self, identity: Identity) -> Result<()> {
        match &self.identity {
            Some(bound) if *bound != identity => Err(Error::IdentityConflict {
                bound: bound.clone(),
                attempted: identity,
            }),
            _ => {
                self.identity = Some(identity);
                Ok(())
            }
        }
    }

    /// Mark the record as confirmed by the authority.
    pub fn mark_synced(&mut self, synced_identity: Identity) {
        self.synced_identity = Some(synced_identity);
    }

    /// Apply a local write: refresh the timestamp and drop the sync marker.
    pub(crate) fn touch(&mut self, timestamp: Timestamp) {
        self.updated_at = timestamp;
        self.synced_identity = None;
    }
}
