//! Session stores: persistent conversation transcripts with optional
//! compaction.
//!
//! A [`Session`] is identified by a string id and exposes history reads,
//! atomic batch appends, clearing, and opaque key-value metadata. Each
//! backend applies its [`SessionConfig`] invariants after every append:
//! summarization-based compaction when configured, otherwise a sliding
//! window to `max_messages`.
//!
//! Backends: [`InMemorySession`] (always available), a Redis-backed
//! key-value store (`redis` feature), a MongoDB-backed document store
//! (`mongodb` feature), and a hybrid read-through store when both
//! features are enabled.

pub mod compaction;
mod in_memory;

#[cfg(feature = "mongodb")]
#[cfg_attr(docsrs, doc(cfg(feature = "mongodb")))]
mod mongo;
#[cfg(feature = "redis")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
mod redis;

#[cfg(all(feature = "redis", feature = "mongodb"))]
#[cfg_attr(docsrs, doc(cfg(all(feature = "redis", feature = "mongodb"))))]
mod hybrid;

pub use compaction::CompactionConfig;
pub use in_memory::InMemorySession;

#[cfg(all(feature = "redis", feature = "mongodb"))]
pub use hybrid::HybridSession;
#[cfg(feature = "mongodb")]
pub use mongo::MongoSession;
#[cfg(feature = "redis")]
pub use redis::RedisSession;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::message::Message;

/// Sentinel prefix identifying the summary message produced by
/// compaction.
pub const SUMMARY_SENTINEL: &str = "Previous conversation summary:";

/// Storage kind advertised by a session implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Process-local memory.
    Memory,
    /// Key-value store (e.g. Redis).
    KeyValue,
    /// Document store (e.g. MongoDB).
    Document,
    /// Key-value read-through with document fallback, writing to both.
    Hybrid,
}

impl StorageKind {
    /// Get the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::KeyValue => "key_value",
            Self::Document => "document",
            Self::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session-level invariants applied after every append.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Hard bound on stored messages. `None` leaves the session unbounded
    /// (when compaction is also absent).
    pub max_messages: Option<usize>,
    /// Summarization-based compaction policy.
    pub compaction: Option<CompactionConfig>,
}

impl SessionConfig {
    /// Create an unbounded configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the stored message count.
    #[must_use]
    pub const fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = Some(max_messages);
        self
    }

    /// Enable summarization-based compaction.
    #[must_use]
    pub fn with_compaction(mut self, compaction: CompactionConfig) -> Self {
        self.compaction = Some(compaction);
        self
    }
}

/// Persistent conversation transcript plus opaque metadata, bound to an
/// external id.
///
/// Implementations must serialize concurrent writes to the same session
/// id. Writes are retried at most once by the session itself; further
/// retries are the caller's responsibility.
#[async_trait]
pub trait Session: Send + Sync {
    /// The session id.
    fn id(&self) -> &str;

    /// The storage kind backing this session.
    fn kind(&self) -> StorageKind;

    /// Time-to-live applied to stored data, when the backend supports one.
    fn ttl(&self) -> Option<Duration> {
        None
    }

    /// Load the ordered message history.
    async fn get_history(&self) -> Result<Vec<Message>>;

    /// Append a batch of messages atomically, then apply the session's
    /// compaction/window invariants.
    async fn add_messages(&self, batch: &[Message]) -> Result<()>;

    /// Remove all stored messages and metadata.
    async fn clear(&self) -> Result<()>;

    /// Load the opaque metadata record (an empty object when none).
    async fn get_metadata(&self) -> Result<Value>;

    /// Shallow-merge `patch` into the metadata record. A non-object patch
    /// replaces the record.
    async fn update_metadata(&self, patch: Value) -> Result<()>;
}

/// Shallow-merge a metadata patch into an existing record.
pub(crate) fn merge_metadata(current: Value, patch: Value) -> Value {
    match (current, patch) {
        (Value::Object(mut base), Value::Object(patch)) => {
            for (key, value) in patch {
                base.insert(key, value);
            }
            Value::Object(base)
        }
        (_, patch) => patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn storage_kind_display() {
        assert_eq!(StorageKind::KeyValue.to_string(), "key_value");
        assert_eq!(StorageKind::Hybrid.as_str(), "hybrid");
    }

    #[test]
    fn merge_metadata_shallow_merges_objects() {
        let merged = merge_metadata(
            json!({"a": 1, "b": 2}),
            json!({"b": 3, "c": 4}),
        );
        assert_eq!(merged, json!({"a": 1, "b": 3, "c": 4}));
    }

    #[test]
    fn merge_metadata_replaces_on_non_object() {
        assert_eq!(merge_metadata(json!({"a": 1}), json!(42)), json!(42));
        assert_eq!(merge_metadata(json!(null), json!({"a": 1})), json!({"a": 1}));
    }
}
