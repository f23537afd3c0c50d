//! In-memory session implementation.
//!
//! [`InMemorySession`] stores conversation history in a `Vec<Message>`
//! behind a `tokio::sync::RwLock`. Data is lost when the process exits.
//! Best suited for single-run agents, testing, and short-lived
//! conversations.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::compaction::maintain;
use super::{Session, SessionConfig, StorageKind, merge_metadata};
use crate::error::Result;
use crate::message::Message;

/// In-memory session backed by `tokio::sync::RwLock<Vec<Message>>`.
///
/// The write lock is held across compaction so concurrent appends to the
/// same session are serialized.
#[derive(Debug)]
pub struct InMemorySession {
    id: String,
    config: SessionConfig,
    messages: RwLock<Vec<Message>>,
    metadata: RwLock<Value>,
}

impl InMemorySession {
    /// Creates an empty, unbounded session.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_config(id, SessionConfig::default())
    }

    /// Creates an empty session with the given invariants.
    #[must_use]
    pub fn with_config(id: impl Into<String>, config: SessionConfig) -> Self {
        Self {
            id: id.into(),
            config,
            messages: RwLock::new(Vec::new()),
            metadata: RwLock::new(Value::Object(Map::new())),
        }
    }

    /// Creates a session pre-populated with `messages`.
    #[must_use]
    pub fn with_messages(id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            id: id.into(),
            config: SessionConfig::default(),
            messages: RwLock::new(messages),
            metadata: RwLock::new(Value::Object(Map::new())),
        }
    }
}

#[async_trait]
impl Session for InMemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Memory
    }

    async fn get_history(&self) -> Result<Vec<Message>> {
        Ok(self.messages.read().await.clone())
    }

    async fn add_messages(&self, batch: &[Message]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut guard = self.messages.write().await;
        guard.extend(batch.iter().cloned());
        let merged = std::mem::take(&mut *guard);
        *guard = maintain(&self.config, merged).await;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.messages.write().await.clear();
        *self.metadata.write().await = Value::Object(Map::new());
        Ok(())
    }

    async fn get_metadata(&self) -> Result<Value> {
        Ok(self.metadata.read().await.clone())
    }

    async fn update_metadata(&self, patch: Value) -> Result<()> {
        let mut guard = self.metadata.write().await;
        let current = std::mem::take(&mut *guard);
        *guard = merge_metadata(current, patch);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::message::Role;
    use crate::session::SUMMARY_SENTINEL;
    use crate::session::compaction::{CompactionConfig, is_summary};
    use serde_json::json;

    fn sample_messages(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| match i % 3 {
                0 => Message::system(format!("system-{i}")),
                1 => Message::user(format!("user-{i}")),
                _ => Message::assistant(format!("assistant-{i}")),
            })
            .collect()
    }

    mod basics {
        use super::*;

        #[tokio::test]
        async fn appends_in_order() {
            let session = InMemorySession::new("s1");
            let batch = sample_messages(3);
            session.add_messages(&batch).await.unwrap();
            assert_eq!(session.get_history().await.unwrap(), batch);
        }

        #[tokio::test]
        async fn empty_batch_is_noop() {
            let session = InMemorySession::with_messages("s2", sample_messages(2));
            session.add_messages(&[]).await.unwrap();
            assert_eq!(session.get_history().await.unwrap().len(), 2);
        }

        #[tokio::test]
        async fn clear_removes_messages_and_metadata() {
            let session = InMemorySession::with_messages("s3", sample_messages(4));
            session.update_metadata(json!({"k": 1})).await.unwrap();
            session.clear().await.unwrap();
            assert!(session.get_history().await.unwrap().is_empty());
            assert_eq!(session.get_metadata().await.unwrap(), json!({}));
        }

        #[tokio::test]
        async fn metadata_merges_shallowly() {
            let session = InMemorySession::new("s4");
            session.update_metadata(json!({"a": 1, "b": 2})).await.unwrap();
            session.update_metadata(json!({"b": 3})).await.unwrap();
            assert_eq!(session.get_metadata().await.unwrap(), json!({"a": 1, "b": 3}));
        }

        #[test]
        fn advertises_kind() {
            let session = InMemorySession::new("s5");
            assert_eq!(session.kind(), StorageKind::Memory);
            assert!(session.ttl().is_none());
        }
    }

    mod invariants {
        use super::*;

        #[tokio::test]
        async fn max_messages_is_enforced_after_append() {
            let session = InMemorySession::with_config(
                "w1",
                SessionConfig::new().with_max_messages(5),
            );
            session.add_messages(&sample_messages(9)).await.unwrap();
            let stored = session.get_history().await.unwrap();
            assert_eq!(stored.len(), 5);
            assert_eq!(stored[4].text(), "assistant-8");
        }

        #[tokio::test]
        async fn compaction_produces_summary_plus_recent() {
            let session = InMemorySession::with_config(
                "c1",
                SessionConfig::new().with_compaction(
                    CompactionConfig::new().with_threshold(10).with_keep_recent(3),
                ),
            );
            for i in 0..12 {
                session
                    .add_messages(&[Message::user(format!("m{i}"))])
                    .await
                    .unwrap();
            }

            let stored = session.get_history().await.unwrap();
            assert!(is_summary(&stored[0]));
            assert!(stored[0].text().starts_with(SUMMARY_SENTINEL));
            assert_eq!(stored.len(), 4);
            assert_eq!(stored[1].text(), "m9");
            assert_eq!(stored[3].text(), "m11");
            assert_eq!(stored[0].role, Role::System);
        }
    }

    mod concurrency {
        use super::*;

        #[tokio::test]
        async fn concurrent_writers_are_serialized() {
            let session = Arc::new(InMemorySession::new("cw"));
            let handles: Vec<_> = (0..50)
                .map(|i| {
                    let s = Arc::clone(&session);
                    tokio::spawn(async move {
                        s.add_messages(&[Message::user(format!("msg-{i}"))])
                            .await
                            .unwrap();
                    })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap();
            }
            assert_eq!(session.get_history().await.unwrap().len(), 50);
        }
    }
}
