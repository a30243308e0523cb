//! Key/value state persisted between executions.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;

/// Restart state of a job or step execution.
///
/// Values are stored as JSON so any serde type can round-trip through the
/// ledger. The dirty flag tracks whether anything changed since the last
/// persist.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    entries: BTreeMap<String, serde_json::Value>,
    #[serde(skip)]
    dirty: bool,
}

impl PartialEq for ExecutionContext {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl ExecutionContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a raw JSON value.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        let key = key.into();
        let value = value.into();
        if self.entries.get(&key) != Some(&value) {
            self.entries.insert(key, value);
            self.dirty = true;
        }
    }

    /// Stores any serializable value.
    pub fn put_serialized<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.put(key, value);
        Ok(())
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.put(key, value);
        self
    }

    /// Returns the raw value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }

    /// Returns a string value.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(serde_json::Value::as_str)
    }

    /// Returns an unsigned integer value.
    #[must_use]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.entries.get(key).and_then(serde_json::Value::as_u64)
    }

    /// Returns a signed integer value.
    #[must_use]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.entries.get(key).and_then(serde_json::Value::as_i64)
    }

    /// Deserializes a value into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<Result<T, serde_json::Error>> {
        self.entries
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes a key.
    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Copies every entry of `other` into this context.
    pub fn merge(&mut self, other: &Self) {
        for (key, value) in &other.entries {
            self.put(key.clone(), value.clone());
        }
    }

    /// Iterates over the entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.entries.iter()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the context is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if the context changed since the last [`Self::clear_dirty`].
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Marks the context as persisted.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}
