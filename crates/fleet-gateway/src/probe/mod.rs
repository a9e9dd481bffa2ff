//! Reachability prober.
//!
//! Every cycle, every registered address is probed concurrently; each device
//! keeps a rolling window of outcomes whose aggregates are persisted to the
//! device registry table. Probe and storage failures are logged and never
//! stop the scheduler.

use crate::domain::config::ProbeConfig;
use crate::domain::window::ProbeWindow;
use crate::link::DeviceRegistry;
use crate::ports::Pinger;
use crate::store::Store;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

pub struct ReachabilityProber {
    registry: Arc<DeviceRegistry>,
    store: Arc<Store>,
    pinger: Arc<dyn Pinger>,
    config: ProbeConfig,
    windows: HashMap<String, ProbeWindow>,
    shutdown: watch::Receiver<bool>,
}

impl ReachabilityProber {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        store: Arc<Store>,
        pinger: Arc<dyn Pinger>,
        config: ProbeConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            registry,
            store,
            pinger,
            config,
            windows: HashMap::new(),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return;
                    }
                }
            }

            self.run_cycle().await;
        }
    }

    /// Probe every address concurrently, then fold outcomes into the
    /// windows and persist the aggregates.
    async fn run_cycle(&mut self) {
        let addresses = self.registry.addresses();
        if addresses.is_empty() {
            return;
        }

        let timeout = self.config.timeout();
        let probes = addresses.into_iter().map(|addr| {
            let pinger = Arc::clone(&self.pinger);
            async move {
                let sample = pinger.probe(&addr, timeout).await;
                (addr, sample)
            }
        });
        let outcomes = futures_util::future::join_all(probes).await;

        for (addr, sample) in outcomes {
            let window = self
                .windows
                .entry(addr.clone())
                .or_insert_with(|| ProbeWindow::new(self.config.probe_window));
            window.push(sample);

            let ping_avg = window.ping_avg();
            let ping_success = window.ping_success();
            let last_ok = window.last_succeeded();
            debug!(addr = %addr, ping_avg, ping_success, "Probe cycle result");

            if let Err(e) = self
                .store
                .upsert_comm_status(&addr, ping_avg, ping_success, last_ok)
                .await
            {
                warn!(addr = %addr, error = %e, "Comm status upsert failed");
            }
        }
    }
}
