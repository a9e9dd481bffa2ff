//! Fan-out to connected browser sessions.

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Registry of open browser sessions.
///
/// Each session owns a writer task draining an unbounded channel, so a slow
/// socket only backs up its own channel and never the broadcast loop. A send
/// to a closed session is a no-op; the session's handler unregisters itself.
#[derive(Default)]
pub struct BrowserHub {
    sessions: DashMap<Uuid, mpsc::UnboundedSender<String>>,
}

impl BrowserHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session's outbound channel, returning its id.
    pub fn register(&self, tx: mpsc::UnboundedSender<String>) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions.insert(id, tx);
        debug!(session_id = %id, sessions = self.sessions.len(), "Browser session registered");
        id
    }

    pub fn unregister(&self, id: &Uuid) {
        if self.sessions.remove(id).is_some() {
            debug!(session_id = %id, sessions = self.sessions.len(), "Browser session removed");
        }
    }

    /// Send `{type, data}` to every open session.
    pub fn broadcast(&self, frame_type: &str, data: &Value) {
        let frame = serde_json::json!({"type": frame_type, "data": data}).to_string();
        self.broadcast_text(&frame);
    }

    /// Send an already-serialized frame to every open session.
    pub fn broadcast_text(&self, frame: &str) {
        for session in self.sessions.iter() {
            // Closed receivers are cleaned up by their own session handler
            if session.value().send(frame.to_string()).is_err() {
                trace!(session_id = %session.key(), "Dropping frame for closed session");
            }
        }
    }

    /// Send a frame to a single session.
    pub fn send_to(&self, id: &Uuid, frame: String) {
        if let Some(session) = self.sessions.get(id) {
            let _ = session.value().send(frame);
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
