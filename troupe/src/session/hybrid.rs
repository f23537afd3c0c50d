//! Hybrid session: key-value reads with document fallback, writes to
//! both.
//!
//! Reads come from the Redis store; when it errors or is empty, the
//! MongoDB store answers instead. Every append lands in Redis
//! immediately; document writes are batched and flushed once the pending
//! buffer reaches `sync_every` messages (and on [`HybridSession::flush`]
//! or `clear`). The flush counter is per-session-instance, not global.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use super::{MongoSession, RedisSession, Session, StorageKind};
use crate::error::Result;
use crate::message::Message;

const DEFAULT_SYNC_EVERY: usize = 10;

/// Key-value session with a document-store backstop.
#[derive(Debug)]
pub struct HybridSession {
    kv: RedisSession,
    doc: MongoSession,
    sync_every: usize,
    pending: Mutex<Vec<Message>>,
}

impl HybridSession {
    /// Combine a key-value and a document session.
    ///
    /// Both should be bound to the same session id; the key-value id is
    /// authoritative.
    #[must_use]
    pub fn new(kv: RedisSession, doc: MongoSession) -> Self {
        Self {
            kv,
            doc,
            sync_every: DEFAULT_SYNC_EVERY,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Set how many messages accumulate before a document flush.
    #[must_use]
    pub fn with_sync_every(mut self, sync_every: usize) -> Self {
        self.sync_every = sync_every.max(1);
        self
    }

    /// Flush buffered messages to the document store.
    ///
    /// # Errors
    ///
    /// Returns the document store's write error; the buffered messages
    /// are kept for the next flush in that case.
    pub async fn flush(&self) -> Result<()> {
        let mut pending = self.pending.lock().await;
        if pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut *pending);
        match self.doc.add_messages(&batch).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Put the batch back so it is not lost.
                let mut restored = batch;
                restored.extend(std::mem::take(&mut *pending));
                *pending = restored;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Session for HybridSession {
    fn id(&self) -> &str {
        self.kv.id()
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Hybrid
    }

    fn ttl(&self) -> Option<std::time::Duration> {
        self.kv.ttl()
    }

    async fn get_history(&self) -> Result<Vec<Message>> {
        match self.kv.get_history().await {
            Ok(messages) if !messages.is_empty() => Ok(messages),
            Ok(_) => self.doc.get_history().await,
            Err(e) => {
                debug!(error = %e, "Key-value read failed; falling back to document store");
                self.doc.get_history().await
            }
        }
    }

    async fn add_messages(&self, batch: &[Message]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.kv.add_messages(batch).await?;

        let should_flush = {
            let mut pending = self.pending.lock().await;
            pending.extend(batch.iter().cloned());
            pending.len() >= self.sync_every
        };
        if should_flush {
            self.flush().await?;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.pending.lock().await.clear();
        self.kv.clear().await?;
        self.doc.clear().await
    }

    async fn get_metadata(&self) -> Result<Value> {
        match self.kv.get_metadata().await {
            Ok(value) if !value.as_object().is_some_and(serde_json::Map::is_empty) => Ok(value),
            _ => self.doc.get_metadata().await,
        }
    }

    async fn update_metadata(&self, patch: Value) -> Result<()> {
        self.kv.update_metadata(patch.clone()).await?;
        self.doc.update_metadata(patch).await
    }
}
