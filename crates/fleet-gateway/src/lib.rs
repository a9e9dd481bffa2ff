//! Fleet Gateway - bridge between homebase controllers, browsers, and the
//! shared store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         FLEET GATEWAY                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐  │
//! │  │ Homebase     │   │ Notification │   │ Reachability Prober  │  │
//! │  │ Links (1/dev)│   │ Listener     │   │ (rolling window)     │  │
//! │  └──────┬───────┘   └──────┬───────┘   └──────────┬───────────┘  │
//! │         │ datapoints       │ LISTEN payloads      │ aggregates   │
//! │         ▼                  ▼                      ▼              │
//! │  ┌─────────────────────────────────┐   ┌──────────────────────┐  │
//! │  │ Status Hub (dedupe + snapshots) │   │ Store (Postgres)     │  │
//! │  └──────────────┬──────────────────┘   └──────────────────────┘  │
//! │                 │ {type, data} frames                            │
//! │                 ▼                                                │
//! │  ┌─────────────────────────────────┐                             │
//! │  │ Browser sessions (port 8080)    │                             │
//! │  └─────────────────────────────────┘                             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each homebase link is an independent supervised task (dial, back-off,
//! heartbeat, resubscribe, request correlation, chunk reassembly); the hub
//! is the single owner of the snapshots browsers are seeded with.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod domain;
pub mod hub;
pub mod link;
pub mod ports;
pub mod probe;
pub mod service;
pub mod store;
pub mod ws;

// Re-exports for the binary and tests
pub use domain::config::GatewayConfig;
pub use domain::error::{GatewayError, LinkError};
pub use hub::StatusHub;
pub use link::{DeviceRegistry, LinkHandle};
pub use service::GatewayService;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
