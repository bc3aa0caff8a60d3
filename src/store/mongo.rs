//! MongoDB store backend
//!
//! Each logical table is one collection; documents are
//! `{ _id: <key>, value: <json>, updated_at: <date> }`.

use async_trait::async_trait;
use bson::{doc, Bson, DateTime, Document};
use mongodb::options::ReturnDocument;
use mongodb::{Client, Collection};
use serde_json::Value;
use std::future::IntoFuture;
use std::time::Duration;
use tracing::{info, warn};

use super::KeyValueStore;
use crate::types::{EconomyError, Result};

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and verify with a ping
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| EconomyError::Store(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| EconomyError::Store(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// [`KeyValueStore`] over MongoDB with a per-operation timeout
pub struct MongoStore {
    mongo: MongoClient,
    op_timeout: Duration,
}

impl MongoStore {
    pub fn new(mongo: MongoClient, op_timeout: Duration) -> Self {
        Self { mongo, op_timeout }
    }

    fn collection(&self, table: &str) -> Collection<Document> {
        self.mongo
            .inner()
            .database(self.mongo.db_name())
            .collection::<Document>(table)
    }

    /// Bound a driver call so a stuck operation surfaces as an error
    async fn timed<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: IntoFuture<Output = std::result::Result<T, mongodb::error::Error>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(EconomyError::from),
            Err(_) => {
                warn!(operation = %what, timeout_ms = self.op_timeout.as_millis() as u64, "Store operation timed out");
                Err(EconomyError::Store(format!("{what} timed out")))
            }
        }
    }
}

fn value_from_doc(doc: &Document) -> Result<Option<Value>> {
    match doc.get("value") {
        Some(bson) => {
            let value: Value = bson::from_bson(bson.clone())
                .map_err(|e| EconomyError::Store(format!("Corrupt stored value: {e}")))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

#[async_trait]
impl KeyValueStore for MongoStore {
    async fn get(&self, table: &str, key: &str) -> Result<Option<Value>> {
        let found = self
            .timed("get", self.collection(table).find_one(doc! { "_id": key }))
            .await?;
        match found {
            Some(doc) => value_from_doc(&doc),
            None => Ok(None),
        }
    }

    async fn set(&self, table: &str, key: &str, value: Value) -> Result<()> {
        let bson = bson::to_bson(&value)
            .map_err(|e| EconomyError::Store(format!("Unstorable value: {e}")))?;
        let replacement = doc! {
            "_id": key,
            "value": bson,
            "updated_at": DateTime::now(),
        };
        self.timed(
            "set",
            self.collection(table)
                .replace_one(doc! { "_id": key }, replacement)
                .upsert(true),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, table: &str, key: &str) -> Result<bool> {
        let result = self
            .timed("delete", self.collection(table).delete_one(doc! { "_id": key }))
            .await?;
        Ok(result.deleted_count > 0)
    }

    async fn increment(&self, table: &str, key: &str, delta: i64) -> Result<i64> {
        let updated = self
            .timed(
                "increment",
                self.collection(table)
                    .find_one_and_update(
                        doc! { "_id": key },
                        doc! {
                            "$inc": { "value": delta },
                            "$set": { "updated_at": DateTime::now() },
                        },
                    )
                    .upsert(true)
                    .return_document(ReturnDocument::After),
            )
            .await?;

        match updated.as_ref().and_then(|d| d.get("value")) {
            Some(Bson::Int64(n)) => Ok(*n),
            Some(Bson::Int32(n)) => Ok(i64::from(*n)),
            _ => Err(EconomyError::Store(format!(
                "{table}:{key} does not hold an integer"
            ))),
        }
    }
}
