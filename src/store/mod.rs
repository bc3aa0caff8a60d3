//! Key-value persistence for the economy engines
//!
//! The engines only ever talk to [`KeyValueStore`], a namespaced async
//! get/set/delete/increment interface. Two backends exist:
//!
//! - [`MemoryStore`]: in-process `DashMap`, used in dev mode and tests
//! - [`MongoStore`]: one MongoDB collection per table
//!
//! A store serializes individual operations but never multi-step
//! sequences. [`Table::update`] pairs the store with [`KeyLocks`] so a
//! read-modify-write on one key is serial within this process.

pub mod locks;
pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::types::Result;

pub use locks::KeyLocks;
pub use memory::MemoryStore;
pub use mongo::{MongoClient, MongoStore};

/// Abstract namespaced JSON store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `None` when the key was never set or was deleted
    async fn get(&self, table: &str, key: &str) -> Result<Option<Value>>;

    /// Write a value, replacing any previous one
    async fn set(&self, table: &str, key: &str, value: Value) -> Result<()>;

    /// Remove a value, returning whether it existed
    async fn delete(&self, table: &str, key: &str) -> Result<bool>;

    /// Add `delta` to an integer value (missing counts as 0) and return the result
    async fn increment(&self, table: &str, key: &str, delta: i64) -> Result<i64>;
}

/// Typed view over one table of a [`KeyValueStore`]
pub struct Table<T> {
    name: &'static str,
    store: Arc<dyn KeyValueStore>,
    locks: Arc<KeyLocks>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Table<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            store: Arc::clone(&self.store),
            locks: Arc::clone(&self.locks),
            _marker: PhantomData,
        }
    }
}

impl<T> Table<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    pub fn new(name: &'static str, store: Arc<dyn KeyValueStore>, locks: Arc<KeyLocks>) -> Self {
        Self {
            name,
            store,
            locks,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn get(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(self.name, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn put(&self, key: &str, value: &T) -> Result<()> {
        self.store
            .set(self.name, key, serde_json::to_value(value)?)
            .await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.store.delete(self.name, key).await
    }

    pub async fn increment(&self, key: &str, delta: i64) -> Result<i64> {
        self.store.increment(self.name, key, delta).await
    }

    /// Locked read-modify-write where absence is meaningful.
    ///
    /// Leaving the slot as `None` deletes the key. The closure runs while
    /// the key lock is held and must not call back into the store.
    pub async fn update_opt<R, F>(&self, key: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut Option<T>) -> Result<R> + Send,
    {
        let _guard = self.locks.lock(format!("{}:{}", self.name, key)).await;
        let mut slot = self.get(key).await?;
        let out = f(&mut slot)?;
        match slot {
            Some(value) => self.put(key, &value).await?,
            None => {
                self.delete(key).await?;
            }
        }
        Ok(out)
    }
}

impl<T> Table<T>
where
    T: Serialize + DeserializeOwned + Default + Send,
{
    pub async fn get_or_default(&self, key: &str) -> Result<T> {
        Ok(self.get(key).await?.unwrap_or_default())
    }

    /// Locked read-modify-write starting from `T::default()` when missing
    pub async fn update<R, F>(&self, key: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut T) -> Result<R> + Send,
    {
        self.update_opt(key, |slot| {
            let value = slot.get_or_insert_with(T::default);
            f(value)
        })
        .await
    }
}

impl<E> Table<Vec<E>>
where
    E: Serialize + DeserializeOwned + Send,
{
    /// Prepend an entry to an append-only log, keeping at most `cap` entries
    pub async fn push_capped(&self, key: &str, entry: E, cap: usize) -> Result<()> {
        self.update(key, |entries| {
            entries.insert(0, entry);
            entries.truncate(cap);
            Ok(())
        })
        .await
    }
}
