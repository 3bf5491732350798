//! Connection registry - tracks connected RPC clients
//!
//! Fan-out is backpressure-free from the caller's perspective: frames go
//! into per-connection bounded channels and a slow consumer only affects
//! its own connection.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::protocol::ServerFrame;

/// Client capability advertising interest in verbose tool events.
pub const CAP_TOOL_EVENTS: &str = "tool-events";

/// One connected client.
pub struct ConnectionHandle {
    pub conn_id: String,
    pub tx: mpsc::Sender<ServerFrame>,
    pub caps: Vec<String>,
    pub session_keys: HashSet<String>,
}

impl ConnectionHandle {
    pub fn has_cap(&self, cap: &str) -> bool {
        self.caps.iter().any(|c| c == cap)
    }
}

/// Central hub for connected clients.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        conn_id: String,
        caps: Vec<String>,
        tx: mpsc::Sender<ServerFrame>,
    ) {
        let mut connections = self.connections.write().await;
        if connections.contains_key(&conn_id) {
            warn!("Connection {} already registered, replacing", conn_id);
        }
        info!("Registering connection {} caps={:?}", conn_id, caps);
        connections.insert(
            conn_id.clone(),
            ConnectionHandle {
                conn_id,
                tx,
                caps,
                session_keys: HashSet::new(),
            },
        );
    }

    pub async fn unregister(&self, conn_id: &str) {
        let mut connections = self.connections.write().await;
        if connections.remove(conn_id).is_some() {
            info!("Connection {} unregistered", conn_id);
        }
    }

    /// Mark a connection as subscribed to a session's events.
    pub async fn subscribe_session(&self, conn_id: &str, session_key: &str) {
        let mut connections = self.connections.write().await;
        if let Some(conn) = connections.get_mut(conn_id) {
            conn.session_keys.insert(session_key.to_string());
        }
    }

    pub async fn has_cap(&self, conn_id: &str, cap: &str) -> bool {
        self.connections
            .read()
            .await
            .get(conn_id)
            .is_some_and(|conn| conn.has_cap(cap))
    }

    /// Send an event frame to every connection.
    pub async fn broadcast(&self, event: &str, payload: Value) {
        let connections = self.connections.read().await;
        for conn in connections.values() {
            self.send_frame(conn, event, payload.clone()).await;
        }
    }

    /// Send an event frame to a connection subset.
    pub async fn broadcast_to(&self, conn_ids: &[String], event: &str, payload: Value) {
        let connections = self.connections.read().await;
        for conn_id in conn_ids {
            if let Some(conn) = connections.get(conn_id) {
                self.send_frame(conn, event, payload.clone()).await;
            }
        }
    }

    /// Best-effort delivery to every connection subscribed to a session.
    /// Returns the number of connections reached.
    pub async fn send_to_session(&self, session_key: &str, event: &str, payload: Value) -> usize {
        let connections = self.connections.read().await;
        let mut reached = 0;
        for conn in connections.values() {
            if conn.session_keys.contains(session_key) {
                self.send_frame(conn, event, payload.clone()).await;
                reached += 1;
            }
        }
        reached
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    async fn send_frame(&self, conn: &ConnectionHandle, event: &str, payload: Value) {
        let frame = ServerFrame::Event {
            event: event.to_string(),
            payload,
        };
        if conn.tx.send(frame).await.is_err() {
            debug!("Dropping frame for closed connection {}", conn.conn_id);
        }
    }
}
