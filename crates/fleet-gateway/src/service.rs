//! Gateway service: constructs every component, wires them together, and
//! owns the shutdown signal.

use crate::domain::config::GatewayConfig;
use crate::domain::error::GatewayError;
use crate::hub::StatusHub;
use crate::link::DeviceRegistry;
use crate::ports::{Pinger, SimulatedWriter, StatusWriter, SystemPinger};
use crate::probe::ReachabilityProber;
use crate::store::listener::NotificationListener;
use crate::store::{PgStatusWriter, Store};
use crate::ws::{self, AppState};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

pub struct GatewayService {
    config: Arc<GatewayConfig>,
    hub: Arc<StatusHub>,
    registry: Arc<DeviceRegistry>,
    store: Arc<Store>,
    shutdown: watch::Sender<bool>,
}

impl GatewayService {
    /// Connect the store and build the component graph.
    pub async fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        config
            .validate()
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        let config = Arc::new(config);

        let url = config.store.resolved_url().ok_or_else(|| {
            GatewayError::Config("no database URL (set DATABASE_URL or store.database_url)".into())
        })?;
        let store = Arc::new(Store::connect(&url).await?);

        // Pluggable write path: log the upserts, or own the status table
        let writer: Arc<dyn StatusWriter> = if config.store.authoritative_status_writes {
            info!("Status writes are authoritative");
            Arc::new(PgStatusWriter::new(Arc::clone(&store)))
        } else {
            Arc::new(SimulatedWriter)
        };
        let hub = Arc::new(StatusHub::new(writer));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let registry = Arc::new(DeviceRegistry::new(
            Arc::clone(&config),
            Arc::clone(&hub),
            shutdown_rx,
        ));

        Ok(Self {
            config,
            hub,
            registry,
            store,
            shutdown,
        })
    }

    /// Start every background task and the browser server.
    pub async fn start(&self) -> Result<(), GatewayError> {
        info!("Starting fleet gateway...");

        // Known devices drive link creation; a store hiccup here only delays
        // links until devices are added again
        match self.store.load_device_addresses().await {
            Ok(addrs) => {
                info!(devices = addrs.len(), "Loaded device registry");
                self.registry.bootstrap(&addrs);
            }
            Err(e) => warn!(error = %e, "Device bootstrap failed"),
        }

        let listener = NotificationListener::new(
            Arc::clone(&self.store),
            Arc::clone(&self.hub),
            self.config.store.clone(),
            self.shutdown.subscribe(),
        );
        tokio::spawn(listener.run());

        let pinger: Arc<dyn Pinger> = Arc::new(SystemPinger);
        let prober = ReachabilityProber::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.store),
            pinger,
            self.config.probe.clone(),
            self.shutdown.subscribe(),
        );
        tokio::spawn(prober.run());

        let state = AppState {
            config: Arc::clone(&self.config),
            hub: Arc::clone(&self.hub),
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
        };
        tokio::spawn(async move {
            if let Err(e) = ws::serve(state).await {
                warn!(error = %e, "Browser server stopped");
            }
        });

        info!(
            browser_port = self.config.browser.browser_port,
            "Fleet gateway started"
        );
        Ok(())
    }

    /// Trigger graceful shutdown of every supervised task.
    pub fn shutdown(&self) {
        info!("Initiating graceful shutdown...");
        let _ = self.shutdown.send(true);
    }

    pub fn hub(&self) -> Arc<StatusHub> {
        Arc::clone(&self.hub)
    }

    pub fn registry(&self) -> Arc<DeviceRegistry> {
        Arc::clone(&self.registry)
    }
}
