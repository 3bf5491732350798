//! Session record storage
//!
//! Persistent session storage is an external collaborator; the gateway only
//! depends on the `SessionStore` trait. `MemorySessionStore` backs tests and
//! single-process deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::run::VerboseLevel;
use crate::Result;

/// Whether outbound delivery is permitted for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendPolicy {
    Allow,
    Deny,
}

/// One session record, keyed by scoped session key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub session_id: String,
    pub updated_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose_level: Option<VerboseLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawned_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_space: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_policy: Option<SendPolicy>,
}

impl SessionEntry {
    /// Fill missing conversation-group fields from the parent session when
    /// this session was spawned as a sub-run.
    pub fn inherit_group_from(&mut self, parent: &SessionEntry) {
        if self.group_id.is_none() {
            self.group_id = parent.group_id.clone();
        }
        if self.group_channel.is_none() {
            self.group_channel = parent.group_channel.clone();
        }
        if self.group_space.is_none() {
            self.group_space = parent.group_space.clone();
        }
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_key: &str) -> Result<Option<SessionEntry>>;
    async fn update(&self, session_key: &str, entry: SessionEntry) -> Result<()>;
}

/// In-memory session store. Rebuilt empty on process restart.
#[derive(Default)]
pub struct MemorySessionStore {
    entries: RwLock<HashMap<String, SessionEntry>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, session_key: &str) -> Result<Option<SessionEntry>> {
        Ok(self.entries.read().await.get(session_key).cloned())
    }

    async fn update(&self, session_key: &str, entry: SessionEntry) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(session_key.to_string(), entry);
        Ok(())
    }
}
