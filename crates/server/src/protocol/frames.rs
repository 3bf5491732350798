//! RPC channel framing
//!
//! The channel is bidirectional and framed as typed `req` / `res` / `event`
//! messages. A request may receive more than one `res` frame with the same
//! id: streaming runs acknowledge with an "accepted" frame and later push a
//! terminal frame correlated by `runId`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use super::error::ErrorShape;

/// Frames sent by a connected client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Req {
        id: String,
        method: String,
        #[serde(default)]
        params: Value,
    },
}

/// Frames sent by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    Res {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorShape>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<Value>,
    },
    Event {
        event: String,
        payload: Value,
    },
}

/// Response channel for one request id. Cloneable so spawned run tasks can
/// push the terminal frame after the accepted acknowledgment.
#[derive(Clone)]
pub struct Responder {
    request_id: String,
    tx: mpsc::Sender<ServerFrame>,
}

impl Responder {
    pub fn new(request_id: impl Into<String>, tx: mpsc::Sender<ServerFrame>) -> Self {
        Self {
            request_id: request_id.into(),
            tx,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub async fn respond(
        &self,
        ok: bool,
        payload: Option<Value>,
        error: Option<ErrorShape>,
        meta: Option<Value>,
    ) {
        let frame = ServerFrame::Res {
            id: self.request_id.clone(),
            ok,
            payload,
            error,
            meta,
        };
        if self.tx.send(frame).await.is_err() {
            warn!("connection gone before response for req {}", self.request_id);
        }
    }

    pub async fn ok(&self, payload: Value) {
        self.respond(true, Some(payload), None, None).await;
    }

    pub async fn ok_with(&self, payload: Value, meta: Value) {
        self.respond(true, Some(payload), None, Some(meta)).await;
    }

    pub async fn error(&self, error: ErrorShape) {
        self.respond(false, None, Some(error), None).await;
    }
}
