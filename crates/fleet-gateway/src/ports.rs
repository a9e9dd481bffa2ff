//! Outbound ports: trait seams between the core and its environment.

use crate::domain::error::GatewayError;
use crate::domain::status::StatusEntry;
use crate::domain::window::ProbeSample;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tracing::debug;

/// Destination for accepted status updates.
///
/// The cache calls this after dedupe. The default adapter only logs the
/// would-be upsert; the store adapter performs it for deployments where the
/// gateway is the authoritative writer.
#[async_trait]
pub trait StatusWriter: Send + Sync {
    async fn upsert_status(&self, entry: &StatusEntry) -> Result<(), GatewayError>;
}

/// Writer that logs the upsert it would have made.
pub struct SimulatedWriter;

#[async_trait]
impl StatusWriter for SimulatedWriter {
    async fn upsert_status(&self, entry: &StatusEntry) -> Result<(), GatewayError> {
        debug!(
            host = %entry.host,
            source = %entry.source,
            status_type = %entry.status_type,
            value = %entry.value,
            "Simulated status upsert"
        );
        Ok(())
    }
}

/// Reachability probe for a single address.
#[async_trait]
pub trait Pinger: Send + Sync {
    /// Probe `addr` once, waiting at most `timeout`.
    async fn probe(&self, addr: &str, timeout: Duration) -> ProbeSample;
}

/// Pinger backed by the system `ping(8)` binary.
///
/// One echo request per probe; the child is bounded both by ping's own `-W`
/// deadline and by an outer timeout in case the binary stalls. No raw-socket
/// privileges required.
pub struct SystemPinger;

#[async_trait]
impl Pinger for SystemPinger {
    async fn probe(&self, addr: &str, timeout: Duration) -> ProbeSample {
        let deadline_secs = format!("{:.1}", timeout.as_secs_f64().max(0.1));
        let started = Instant::now();

        let status = tokio::time::timeout(
            timeout + Duration::from_millis(100),
            tokio::process::Command::new("ping")
                .args(["-n", "-q", "-c", "1", "-W", &deadline_secs, addr])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status(),
        )
        .await;

        match status {
            Ok(Ok(exit)) if exit.success() => {
                ProbeSample::success(started.elapsed().as_millis() as u64)
            }
            _ => ProbeSample::failure(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_writer_accepts_everything() {
        let writer = SimulatedWriter;
        let entry = StatusEntry {
            host: "10.0.0.1".into(),
            source: "ess".into(),
            status_type: "subject".into(),
            value: "sally".into(),
            sys_time: chrono::Utc::now(),
        };
        assert!(writer.upsert_status(&entry).await.is_ok());
    }
}
