//! Status hub: the single owner of the snapshots and the browser fan-out.
//!
//! Homebase links, the store notification listener, and the prober all feed
//! events into the hub; it deduplicates, updates the snapshots, hands
//! accepted statuses to the configured [`StatusWriter`], and publishes to
//! every browser session.

pub mod broadcast;
pub mod cache;

pub use broadcast::BrowserHub;
pub use cache::StatusCache;

use crate::domain::datapoint::Translated;
use crate::domain::status::event;
use crate::ports::StatusWriter;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

pub struct StatusHub {
    cache: StatusCache,
    browsers: BrowserHub,
    writer: Arc<dyn StatusWriter>,
}

impl StatusHub {
    pub fn new(writer: Arc<dyn StatusWriter>) -> Self {
        Self {
            cache: StatusCache::new(),
            browsers: BrowserHub::new(),
            writer,
        }
    }

    /// Apply a translated datapoint from a homebase link.
    ///
    /// Unchanged values are dropped; changed values are broadcast as
    /// `status_changes` and handed to the status writer.
    pub async fn apply_status(&self, host: &str, translated: Translated) {
        let Some(entry) = self.cache.apply_status(
            host,
            &translated.source,
            &translated.status_type,
            &translated.value,
        ) else {
            return;
        };

        self.browsers.broadcast(
            event::STATUS_CHANGES,
            &serde_json::to_value(&entry).expect("status entry serializes"),
        );

        if let Err(e) = self.writer.upsert_status(&entry).await {
            warn!(host = %entry.host, error = %e, "Status write failed");
        }
    }

    /// Reflect a `status_changes` store notification.
    pub async fn apply_status_payload(&self, payload: &Value) {
        let Some(entry) = self.cache.apply_status_payload(payload) else {
            return;
        };
        self.browsers.broadcast(
            event::STATUS_CHANGES,
            &serde_json::to_value(&entry).expect("status entry serializes"),
        );
    }

    /// Reflect a `comm_status_changes` store notification.
    pub fn apply_comm_payload(&self, payload: Value) {
        self.browsers.broadcast(event::COMM_STATUS_CHANGES, &payload);
        self.cache.apply_comm_payload(payload);
    }

    /// Reflect a `perf_stats_changes` store notification.
    pub fn apply_perf_payload(&self, payload: Value) {
        self.browsers.broadcast(event::PERF_STATS_CHANGES, &payload);
        self.cache.apply_perf_payload(payload);
    }

    /// Surface a remote command failure to every browser.
    pub fn broadcast_remote_error(&self, message: &str) {
        self.browsers
            .broadcast(event::TCL_ERROR, &Value::String(message.to_string()));
    }

    /// The three snapshot frames sent to a newly connected browser.
    pub fn snapshot_frames(&self) -> Vec<String> {
        vec![
            serde_json::json!({
                "type": event::STATUS_SNAPSHOT,
                "data": self.cache.status_snapshot(),
            })
            .to_string(),
            serde_json::json!({
                "type": event::COMM_STATUS_SNAPSHOT,
                "data": self.cache.comm_snapshot(),
            })
            .to_string(),
            serde_json::json!({
                "type": event::PERF_STATS_SNAPSHOT,
                "data": self.cache.perf_snapshot(),
            })
            .to_string(),
        ]
    }

    pub fn cache(&self) -> &StatusCache {
        &self.cache
    }

    pub fn browsers(&self) -> &BrowserHub {
        &self.browsers
    }
}
