//! MongoDB-backed document session implementation.
//!
//! One document per session: `{_id, messages: [..], metadata: "..."}`.
//! Each message is stored as a JSON string element so arbitrary payload
//! keys never collide with BSON restrictions. Appends use `$push` with
//! `$each` — and `$slice` in the same update when only a sliding window
//! is configured, which keeps the append atomic. Compaction rewrites the
//! array (read-then-write, not atomic, as documented on the trait).
//!
//! Writes are retried once by the session itself.

use async_trait::async_trait;
use mongodb::bson::{Bson, Document, doc};
use mongodb::options::UpdateOptions;
use mongodb::{Client, Collection};
use serde_json::{Map, Value};
use tracing::debug;

use super::compaction::maintain;
use super::{Session, SessionConfig, StorageKind, merge_metadata};
use crate::error::{Error, Result};
use crate::message::Message;

/// Session backed by one MongoDB document.
#[derive(Debug, Clone)]
pub struct MongoSession {
    id: String,
    collection: Collection<Document>,
    config: SessionConfig,
}

impl MongoSession {
    /// Connect to `uri` and bind to `database`/`collection`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] when the URI is invalid or unreachable.
    pub async fn connect(
        id: impl Into<String>,
        uri: &str,
        database: &str,
        collection: &str,
    ) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let collection = client.database(database).collection::<Document>(collection);
        Ok(Self::with_collection(id, collection, SessionConfig::default()))
    }

    /// Bind to an existing collection handle.
    #[must_use]
    pub fn with_collection(
        id: impl Into<String>,
        collection: Collection<Document>,
        config: SessionConfig,
    ) -> Self {
        Self {
            id: id.into(),
            collection,
            config,
        }
    }

    fn filter(&self) -> Document {
        doc! { "_id": &self.id }
    }

    fn encode(batch: &[Message]) -> Result<Vec<Bson>> {
        batch
            .iter()
            .map(|m| {
                serde_json::to_string(m)
                    .map(Bson::String)
                    .map_err(Error::from)
            })
            .collect()
    }

    fn decode(document: &Document) -> Result<Vec<Message>> {
        let Ok(raw) = document.get_array("messages") else {
            return Ok(Vec::new());
        };
        raw.iter()
            .filter_map(Bson::as_str)
            .map(|s| serde_json::from_str(s).map_err(Error::from))
            .collect()
    }

    /// Atomic append: `$push` with `$each`, plus `$slice` when only a
    /// sliding window is configured.
    async fn push_batch(&self, payloads: &[Bson]) -> Result<()> {
        let mut push = doc! { "$each": payloads.to_vec() };
        if self.config.compaction.is_none()
            && let Some(max) = self.config.max_messages
        {
            push.insert("$slice", -i64::try_from(max).unwrap_or(i64::MAX));
        }
        let update = doc! { "$push": { "messages": push } };
        let options = UpdateOptions::builder().upsert(true).build();
        self.collection
            .update_one(self.filter(), update, options)
            .await?;
        Ok(())
    }

    /// Replace the stored array wholesale (used after compaction).
    async fn rewrite(&self, messages: &[Message]) -> Result<()> {
        let payloads = Self::encode(messages)?;
        let update = doc! { "$set": { "messages": payloads } };
        let options = UpdateOptions::builder().upsert(true).build();
        self.collection
            .update_one(self.filter(), update, options)
            .await?;
        Ok(())
    }

    async fn with_retry<F, Fut>(&self, op: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        match op().await {
            Ok(()) => Ok(()),
            Err(first) => {
                debug!(session = %self.id, error = %first, "Retrying MongoDB write once");
                op().await
            }
        }
    }
}

#[async_trait]
impl Session for MongoSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Document
    }

    async fn get_history(&self) -> Result<Vec<Message>> {
        match self.collection.find_one(self.filter(), None).await? {
            Some(document) => Self::decode(&document),
            None => Ok(Vec::new()),
        }
    }

    async fn add_messages(&self, batch: &[Message]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let payloads = Self::encode(batch)?;
        self.with_retry(|| self.push_batch(&payloads)).await?;

        if self.config.compaction.as_ref().is_some_and(|c| c.enabled) {
            let stored = self.get_history().await?;
            let maintained = maintain(&self.config, stored.clone()).await;
            if maintained != stored {
                self.with_retry(|| self.rewrite(&maintained)).await?;
            }
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.collection.delete_one(self.filter(), None).await?;
        Ok(())
    }

    async fn get_metadata(&self) -> Result<Value> {
        let document = self.collection.find_one(self.filter(), None).await?;
        match document.as_ref().and_then(|d| d.get_str("metadata").ok()) {
            Some(raw) => Ok(serde_json::from_str(raw)?),
            None => Ok(Value::Object(Map::new())),
        }
    }

    async fn update_metadata(&self, patch: Value) -> Result<()> {
        let current = self.get_metadata().await?;
        let merged = merge_metadata(current, patch);
        let payload = serde_json::to_string(&merged)?;
        let update = doc! { "$set": { "metadata": payload } };
        let options = UpdateOptions::builder().upsert(true).build();
        self.collection
            .update_one(self.filter(), update, options)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_produces_string_elements() {
        let batch = vec![Message::user("hi")];
        let encoded = MongoSession::encode(&batch).expect("encodes");
        assert_eq!(encoded.len(), 1);
        assert!(matches!(encoded[0], Bson::String(_)));
    }

    #[test]
    fn decode_skips_missing_array() {
        let document = doc! { "_id": "s" };
        let decoded = MongoSession::decode(&document).expect("decodes");
        assert!(decoded.is_empty());
    }

    #[test]
    fn decode_round_trips_messages() {
        let batch = vec![Message::user("hi"), Message::assistant("hello")];
        let encoded = MongoSession::encode(&batch).expect("encodes");
        let document = doc! { "_id": "s", "messages": encoded };
        let decoded = MongoSession::decode(&document).expect("decodes");
        assert_eq!(decoded, batch);
    }
}
