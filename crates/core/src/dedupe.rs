//! Idempotency cache for deduplicating retried requests
//!
//! Every mutating entry point writes an "accepted" placeholder under its
//! idempotency key before any asynchronous work starts, so a retry that
//! arrives mid-execution replays the placeholder instead of triggering a
//! second execution. The terminal outcome later overwrites the placeholder
//! in a single lock acquisition.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

/// One cached outcome per dedup key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupeEntry {
    pub ts_ms: i64,
    pub ok: bool,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl DedupeEntry {
    pub fn ok(ts_ms: i64, payload: Value) -> Self {
        Self {
            ts_ms,
            ok: true,
            payload,
            error: None,
        }
    }

    pub fn err(ts_ms: i64, payload: Value, error: Value) -> Self {
        Self {
            ts_ms,
            ok: false,
            payload,
            error: Some(error),
        }
    }
}

/// Process-wide idempotency cache.
///
/// The run-execution cache lives for the process lifetime with no eviction.
/// The control-plane cache prunes entries older than a TTL on access.
#[derive(Default)]
pub struct IdempotencyCache {
    entries: Mutex<HashMap<String, DedupeEntry>>,
}

impl IdempotencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<DedupeEntry> {
        self.entries.lock().await.get(key).cloned()
    }

    pub async fn set(&self, key: impl Into<String>, entry: DedupeEntry) {
        self.entries.lock().await.insert(key.into(), entry);
    }

    /// Remove entries older than `ttl_ms`. Returns the number removed.
    pub async fn prune(&self, now_ms: i64, ttl_ms: i64) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| now_ms - entry.ts_ms < ttl_ms);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get_returns_entry() {
        let cache = IdempotencyCache::new();
        cache
            .set("agent:run-1", DedupeEntry::ok(100, json!({"status": "accepted"})))
            .await;

        let entry = cache.get("agent:run-1").await.unwrap();
        assert!(entry.ok);
        assert_eq!(entry.payload["status"], "accepted");
        assert!(cache.get("agent:run-2").await.is_none());
    }

    #[tokio::test]
    async fn terminal_entry_overwrites_placeholder() {
        let cache = IdempotencyCache::new();
        cache
            .set("agent:run-1", DedupeEntry::ok(100, json!({"status": "accepted"})))
            .await;
        cache
            .set(
                "agent:run-1",
                DedupeEntry::err(200, json!({"status": "error"}), json!({"code": "UNAVAILABLE"})),
            )
            .await;

        let entry = cache.get("agent:run-1").await.unwrap();
        assert!(!entry.ok);
        assert_eq!(entry.payload["status"], "error");
        assert!(entry.error.is_some());
    }

    #[tokio::test]
    async fn prune_removes_expired_entries_only() {
        let cache = IdempotencyCache::new();
        cache.set("old", DedupeEntry::ok(0, json!({}))).await;
        cache.set("fresh", DedupeEntry::ok(9_000, json!({}))).await;

        let removed = cache.prune(10_000, 5_000).await;
        assert_eq!(removed, 1);
        assert!(cache.get("old").await.is_none());
        assert!(cache.get("fresh").await.is_some());
    }
}
