//! Redis-backed key-value session implementation.
//!
//! Messages live in a Redis list (`troupe:session:<id>:messages`), one
//! JSON-encoded message per element; metadata lives in a string key next
//! to it. Appends use an atomic `RPUSH` pipeline — with `LTRIM` in the
//! same transaction when only a sliding window is configured, so the
//! bound holds without a read-modify-write. Compaction needs the full
//! list and therefore rewrites it (the read-then-write is not atomic, as
//! documented on the trait).
//!
//! Writes are retried once by the session itself; further retries belong
//! to the caller.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde_json::{Map, Value};
use tracing::debug;

use super::compaction::maintain;
use super::{Session, SessionConfig, StorageKind, merge_metadata};
use crate::error::{Error, Result};
use crate::message::Message;

const KEY_PREFIX: &str = "troupe:session";

/// Session backed by a Redis list plus a metadata key.
#[derive(Debug)]
pub struct RedisSession {
    id: String,
    client: redis::Client,
    messages_key: String,
    metadata_key: String,
    config: SessionConfig,
    ttl: Option<Duration>,
}

impl RedisSession {
    /// Connect to `url` (e.g. `redis://127.0.0.1/`) with default
    /// invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] when the URL is invalid.
    pub fn new(id: impl Into<String>, url: &str) -> Result<Self> {
        Self::with_config(id, url, SessionConfig::default())
    }

    /// Connect with explicit session invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] when the URL is invalid.
    pub fn with_config(id: impl Into<String>, url: &str, config: SessionConfig) -> Result<Self> {
        let id = id.into();
        let client = redis::Client::open(url)?;
        Ok(Self {
            messages_key: format!("{KEY_PREFIX}:{id}:messages"),
            metadata_key: format!("{KEY_PREFIX}:{id}:meta"),
            id,
            client,
            config,
            ttl: None,
        })
    }

    /// Apply a time-to-live to the stored keys.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn encode(batch: &[Message]) -> Result<Vec<String>> {
        batch
            .iter()
            .map(|m| serde_json::to_string(m).map_err(Error::from))
            .collect()
    }

    fn decode(raw: Vec<String>) -> Result<Vec<Message>> {
        raw.iter()
            .map(|s| serde_json::from_str(s).map_err(Error::from))
            .collect()
    }

    fn ttl_seconds(&self) -> Option<i64> {
        self.ttl
            .map(|ttl| i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX))
    }

    /// Atomic append pipeline: `RPUSH`, plus `LTRIM` when only a window
    /// is configured, plus `EXPIRE` when a TTL is set.
    async fn push_batch(&self, payloads: &[String]) -> Result<()> {
        let mut connection = self.connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.rpush(&self.messages_key, payloads);
        if self.config.compaction.is_none()
            && let Some(max) = self.config.max_messages
        {
            let start = -i64::try_from(max).unwrap_or(i64::MAX);
            pipe.ltrim(&self.messages_key, start as isize, -1);
        }
        if let Some(seconds) = self.ttl_seconds() {
            pipe.expire(&self.messages_key, seconds);
        }
        let _: () = pipe.query_async(&mut connection).await?;
        Ok(())
    }

    /// Replace the stored list wholesale (used after compaction).
    async fn rewrite(&self, messages: &[Message]) -> Result<()> {
        let payloads = Self::encode(messages)?;
        let mut connection = self.connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(&self.messages_key);
        if !payloads.is_empty() {
            pipe.rpush(&self.messages_key, &payloads);
        }
        if let Some(seconds) = self.ttl_seconds() {
            pipe.expire(&self.messages_key, seconds);
        }
        let _: () = pipe.query_async(&mut connection).await?;
        Ok(())
    }

    /// Run a write closure, retrying once on failure.
    async fn with_retry<F, Fut>(&self, op: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        match op().await {
            Ok(()) => Ok(()),
            Err(first) => {
                debug!(session = %self.id, error = %first, "Retrying Redis write once");
                op().await
            }
        }
    }
}

#[async_trait]
impl Session for RedisSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> StorageKind {
        StorageKind::KeyValue
    }

    fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    async fn get_history(&self) -> Result<Vec<Message>> {
        let mut connection = self.connection().await?;
        let raw: Vec<String> = connection.lrange(&self.messages_key, 0, -1).await?;
        Self::decode(raw)
    }

    async fn add_messages(&self, batch: &[Message]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let payloads = Self::encode(batch)?;
        self.with_retry(|| self.push_batch(&payloads)).await?;

        // Compaction needs the whole transcript; rewrite only when it
        // actually changed the list.
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
        let mut connection = self.connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(&self.messages_key);
        pipe.del(&self.metadata_key);
        let _: () = pipe.query_async(&mut connection).await?;
        Ok(())
    }

    async fn get_metadata(&self) -> Result<Value> {
        let mut connection = self.connection().await?;
        let raw: Option<String> = connection.get(&self.metadata_key).await?;
        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Value::Object(Map::new())),
        }
    }

    async fn update_metadata(&self, patch: Value) -> Result<()> {
        let current = self.get_metadata().await?;
        let merged = merge_metadata(current, patch);
        let payload = serde_json::to_string(&merged)?;
        let mut connection = self.connection().await?;
        match self.ttl_seconds() {
            Some(seconds) => {
                let seconds = u64::try_from(seconds).unwrap_or(u64::MAX);
                let _: () = connection.set_ex(&self.metadata_key, payload, seconds).await?;
            }
            None => {
                let _: () = connection.set(&self.metadata_key, payload).await?;
            }
        }
        Ok(())
    }
}
