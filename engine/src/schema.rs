//! Table definitions and key extraction.
//!
//! A table's key strategy is fixed when the table is first created. Schema
//! upgrades only ever add tables; they never alter an existing one.

use crate::{error::Result, Error, Identity, TableName};
use serde::{Deserialize, Serialize};

/// How records in a table get their identity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "camelCase")]
pub enum KeyStrategy {
    /// The store assigns sequential integer keys
    #[default]
    AutoIncrement,
    /// The key is read from a payload field (dot-separated for nested fields)
    KeyPath(String),
}

impl std::fmt::Display for KeyStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyStrategy::AutoIncrement => write!(f, "auto-increment"),
            KeyStrategy::KeyPath(path) => write!(f, "key path '{}'", path),
        }
    }
}

/// Definition of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSpec {
    /// Table name, also the physical store name
    pub name: TableName,
    /// Key strategy
    pub key_strategy: KeyStrategy,
}

impl TableSpec {
    /// Create a new table definition.
    pub fn new(name: impl Into<TableName>, key_strategy: KeyStrategy) -> Self {
        Self {
            name: name.into(),
            key_strategy,
        }
    }

    /// Table whose keys are assigned by the store.
    pub fn auto_increment(name: impl Into<TableName>) -> Self {
        Self::new(name, KeyStrategy::AutoIncrement)
    }

    /// Table whose keys are read from `path` in the payload.
    pub fn with_key_path(name: impl Into<TableName>, path: impl Into<String>) -> Self {
        Self::new(name, KeyStrategy::KeyPath(path.into()))
    }

    /// Derive the identity from a payload.
    ///
    /// Returns `Ok(None)` for auto-increment tables, where the identity comes
    /// from the store instead.
    pub fn extract_key(&self, payload: &serde_json::Value) -> Result<Option<Identity>> {
        let KeyStrategy::KeyPath(path) = &self.key_strategy else {
            return Ok(None);
        };

        let mut current = payload;
        for segment in path.split('.') {
            current = current
                .as_object()
                .and_then(|obj| obj.get(segment))
                .ok_or_else(|| Error::InvalidKey {
                    path: path.clone(),
                    reason: format!("missing field '{}'", segment),
                })?;
        }

        Identity::from_value(current)
            .map(Some)
            .ok_or_else(|| Error::InvalidKey {
                path: path.clone(),
                reason: format!("{} is not a string or non-negative integer", current),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn auto_increment_has_no_payload_key() {
        let spec = TableSpec::auto_increment("events");
        assert_eq!(spec.extract_key(&json!({"id": "x"})).unwrap(), None);
    }

    #[test]
    fn key_path_extracts_string_and_int() {
        let spec = TableSpec::with_key_path("notes", "id");

        assert_eq!(
            spec.extract_key(&json!({"id": "a", "text": "hi"})).unwrap(),
            Some(Identity::from("a"))
        );
        assert_eq!(
            spec.extract_key(&json!({"id": 9})).unwrap(),
            Some(Identity::Int(9))
        );
    }

    #[test]
    fn nested_key_path() {
        let spec = TableSpec::with_key_path("users", "profile.handle");
        let payload = json!({"profile": {"handle": "ada"}});

        assert_eq!(
            spec.extract_key(&payload).unwrap(),
            Some(Identity::from("ada"))
        );
    }

    #[test]
    fn missing_key_field() {
        let spec = TableSpec::with_key_path("notes", "id");
        let result = spec.extract_key(&json!({"text": "hi"}));

        assert!(matches!(result, Err(Error::InvalidKey { path, .. }) if path == "id"));
    }

    #[test]
    fn non_key_value() {
        let spec = TableSpec::with_key_path("notes", "id");

        for payload in [json!({"id": null}), json!({"id": [1]}), json!({"id": -3})] {
            assert!(
                matches!(spec.extract_key(&payload), Err(Error::InvalidKey { .. })),
                "expected InvalidKey for {}",
                payload
            );
        }
    }

    #[test]
    fn payload_must_be_object() {
        let spec = TableSpec::with_key_path("notes", "id");
        assert!(spec.extract_key(&json!("just a string")).is_err());
    }

    #[test]
    fn key_strategy_serialization() {
        let spec = TableSpec::with_key_path("notes", "id");
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(
            value,
            json!({"name": "notes", "keyStrategy": {"kind": "keyPath", "path": "id"}})
        );

        let auto = TableSpec::auto_increment("events");
        let value = serde_json::to_value(&auto).unwrap();
        assert_eq!(
            value,
            json!({"name": "events", "keyStrategy": {"kind": "autoIncrement"}})
        );
    }
}
