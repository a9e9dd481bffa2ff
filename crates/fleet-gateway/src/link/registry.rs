//! Device registry: one link supervisor per known homebase address.

use crate::domain::config::GatewayConfig;
use crate::domain::error::GatewayError;
use crate::hub::StatusHub;
use crate::link::supervisor::{spawn_link, LinkHandle};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Canonical set of homebase links, keyed by device address.
///
/// Links are created on demand and live for the rest of the process; the
/// supervisor keeps reconnecting on its own schedule.
pub struct DeviceRegistry {
    links: DashMap<String, LinkHandle>,
    config: Arc<GatewayConfig>,
    hub: Arc<StatusHub>,
    shutdown: watch::Receiver<bool>,
}

impl DeviceRegistry {
    pub fn new(
        config: Arc<GatewayConfig>,
        hub: Arc<StatusHub>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            links: DashMap::new(),
            config,
            hub,
            shutdown,
        }
    }

    /// Return the link for `addr`, starting a supervisor if none exists.
    pub fn ensure(&self, addr: &str) -> Result<LinkHandle, GatewayError> {
        if !self.is_allowed(addr) {
            return Err(GatewayError::AddressNotAllowed(addr.to_string()));
        }

        if let Some(existing) = self.links.get(addr) {
            return Ok(existing.value().clone());
        }

        let handle = self
            .links
            .entry(addr.to_string())
            .or_insert_with(|| {
                info!(addr, "Starting homebase link");
                spawn_link(
                    addr.to_string(),
                    Arc::clone(&self.config),
                    Arc::clone(&self.hub),
                    self.shutdown.clone(),
                )
            })
            .clone();
        Ok(handle)
    }

    /// Start links for every address loaded from the store.
    pub fn bootstrap(&self, addrs: &[String]) {
        for addr in addrs {
            if let Err(e) = self.ensure(addr) {
                info!(addr = %addr, error = %e, "Skipping device");
            }
        }
    }

    /// Empty allow-list means unrestricted.
    fn is_allowed(&self, addr: &str) -> bool {
        let allowed = &self.config.homebase.homebase_allowed_ips;
        allowed.is_empty() || allowed.iter().any(|a| a == addr)
    }

    /// Addresses with a running link.
    pub fn addresses(&self) -> Vec<String> {
        self.links.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
