//! In-memory store backend

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::KeyValueStore;
use crate::types::{EconomyError, Result};

/// DashMap-backed store keyed by `(table, key)`
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<(String, String), Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values across all tables
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a key is physically present (as opposed to reading as a default)
    pub fn contains(&self, table: &str, key: &str) -> bool {
        self.entries
            .contains_key(&(table.to_string(), key.to_string()))
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, table: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .entries
            .get(&(table.to_string(), key.to_string()))
            .map(|v| v.value().clone()))
    }

    async fn set(&self, table: &str, key: &str, value: Value) -> Result<()> {
        self.entries
            .insert((table.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn delete(&self, table: &str, key: &str) -> Result<bool> {
        Ok(self
            .entries
            .remove(&(table.to_string(), key.to_string()))
            .is_some())
    }

    async fn increment(&self, table: &str, key: &str, delta: i64) -> Result<i64> {
        let mut entry = self
            .entries
            .entry((table.to_string(), key.to_string()))
            .or_insert(Value::from(0));
        let current = entry.as_i64().ok_or_else(|| {
            EconomyError::Store(format!("{table}:{key} does not hold an integer"))
        })?;
        let next = current
            .checked_add(delta)
            .ok_or_else(|| EconomyError::Store(format!("{table}:{key} overflowed")))?;
        *entry = Value::from(next);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_tables_are_isolated() {
        let store = MemoryStore::new();
        store.set("coins", "u1", json!(10)).await.unwrap();
        store.set("credit", "u1", json!("2.50")).await.unwrap();

        assert_eq!(store.get("coins", "u1").await.unwrap(), Some(json!(10)));
        assert_eq!(store.get("credit", "u1").await.unwrap(), Some(json!("2.50")));
        assert!(store.delete("coins", "u1").await.unwrap());
        assert!(!store.delete("coins", "u1").await.unwrap());
        assert!(store.contains("credit", "u1"));
    }

    #[tokio::test]
    async fn test_increment_from_missing() {
        let store = MemoryStore::new();
        assert_eq!(store.increment("coins", "u1", 5).await.unwrap(), 5);
        assert_eq!(store.increment("coins", "u1", -2).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_increment_rejects_non_integer() {
        let store = MemoryStore::new();
        store.set("coins", "u1", json!({"a": 1})).await.unwrap();
        assert!(store.increment("coins", "u1", 1).await.is_err());
    }
}
