//! Store change-notification listener.
//!
//! A long-lived LISTEN connection re-broadcasts store-side changes into the
//! browser event stream. Connection loss is recovered with a short delay and
//! a full re-LISTEN; nothing here can take the process down.

use crate::domain::config::StoreConfig;
use crate::hub::StatusHub;
use crate::store::Store;
use serde_json::Value;
use sqlx::postgres::{PgListener, PgNotification};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Channels this service subscribes to.
pub const CHANNELS: &[&str] = &[
    "status_changes",
    "comm_status_changes",
    "perf_stats_changes",
    "new_image",
];

pub struct NotificationListener {
    store: Arc<Store>,
    hub: Arc<StatusHub>,
    config: StoreConfig,
    shutdown: watch::Receiver<bool>,
}

impl NotificationListener {
    pub fn new(
        store: Arc<Store>,
        hub: Arc<StatusHub>,
        config: StoreConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            hub,
            config,
            shutdown,
        }
    }

    /// Run until shutdown, reconnecting forever.
    pub async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                return;
            }

            match self.listen_once().await {
                Ok(()) => return, // shutdown requested
                Err(e) => {
                    warn!(error = %e, "Notification listener lost; reconnecting");
                }
            }

            let delay = self.config.listener_reconnect();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// One LISTEN connection lifetime. `Ok` means shutdown was requested.
    async fn listen_once(&mut self) -> Result<(), sqlx::Error> {
        let mut listener = PgListener::connect_with(self.store.pool()).await?;
        listener.listen_all(CHANNELS.iter().copied()).await?;
        info!(channels = ?CHANNELS, "Listening for store notifications");

        loop {
            tokio::select! {
                notification = listener.recv() => {
                    self.handle(notification?).await;
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn handle(&self, notification: PgNotification) {
        let channel = notification.channel();
        let payload: Value = match serde_json::from_str(notification.payload()) {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    channel,
                    error = %e,
                    "Malformed notification payload dropped"
                );
                return;
            }
        };

        match channel {
            "status_changes" => self.hub.apply_status_payload(&payload).await,
            "comm_status_changes" => self.hub.apply_comm_payload(payload),
            "perf_stats_changes" => self.hub.apply_perf_payload(payload),
            "new_image" => self.handle_new_image(&payload).await,
            other => debug!(channel = other, "Notification on unhandled channel"),
        }
    }

    /// `new_image` payloads carry only `{host, status_type}`; the actual row
    /// (potentially a large encoded image) is fetched before re-entering the
    /// status path.
    async fn handle_new_image(&self, payload: &Value) {
        let Some(host) = payload.get("host").and_then(|v| v.as_str()) else {
            warn!("new_image notification without host dropped");
            return;
        };
        let Some(status_type) = payload.get("status_type").and_then(|v| v.as_str()) else {
            warn!("new_image notification without status_type dropped");
            return;
        };

        match self.store.fetch_status_row(host, status_type).await {
            Ok(Some(row)) => self.hub.apply_status_payload(&row).await,
            Ok(None) => debug!(host, status_type, "new_image row not found"),
            Err(e) => warn!(host, status_type, error = %e, "new_image fetch failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_list() {
        assert_eq!(CHANNELS.len(), 4);
        assert!(CHANNELS.contains(&"status_changes"));
        assert!(CHANNELS.contains(&"comm_status_changes"));
        assert!(CHANNELS.contains(&"perf_stats_changes"));
        assert!(CHANNELS.contains(&"new_image"));
    }
}
