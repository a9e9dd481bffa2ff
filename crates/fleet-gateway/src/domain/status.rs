//! Canonical status records and browser event frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Composite key of a status entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusKey {
    /// Device address the value belongs to
    pub host: String,
    /// Coarse origin tag (`ess`, `system`, `git`, ...)
    pub source: String,
    /// Specific key (`subject`, `running`, `24v-v`, ...)
    pub status_type: String,
}

impl StatusKey {
    pub fn new(
        host: impl Into<String>,
        source: impl Into<String>,
        status_type: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            source: source.into(),
            status_type: status_type.into(),
        }
    }
}

/// A status entry as broadcast to browsers and held in the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub host: String,
    pub source: String,
    #[serde(rename = "type")]
    pub status_type: String,
    pub value: String,
    pub sys_time: DateTime<Utc>,
}

impl StatusEntry {
    pub fn key(&self) -> StatusKey {
        StatusKey::new(&self.host, &self.source, &self.status_type)
    }
}

/// Event tags used on the browser stream.
pub mod event {
    pub const STATUS_CHANGES: &str = "status_changes";
    pub const COMM_STATUS_CHANGES: &str = "comm_status_changes";
    pub const PERF_STATS_CHANGES: &str = "perf_stats_changes";
    pub const TCL_ERROR: &str = "TCL_ERROR";
    pub const STATUS_SNAPSHOT: &str = "status";
    pub const COMM_STATUS_SNAPSHOT: &str = "commStatus";
    pub const PERF_STATS_SNAPSHOT: &str = "perfStats";
}

/// Snapshot key for a comm status row (`device` + `address`).
pub fn comm_status_key(payload: &serde_json::Value) -> String {
    let device = payload.get("device").and_then(|v| v.as_str()).unwrap_or("");
    let address = payload
        .get("address")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    format!("{}|{}", device, address)
}

/// Snapshot key for a perf stats row
/// (`host` + `status_type` + `subject` + `state_system` + `protocol` + `variant`).
pub fn perf_stats_key(payload: &serde_json::Value) -> String {
    let field = |name: &str| {
        payload
            .get(name)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    };
    format!(
        "{}|{}|{}|{}|{}|{}",
        field("host"),
        field("status_type"),
        field("subject"),
        field("state_system"),
        field("protocol"),
        field("variant"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_entry_wire_shape() {
        let entry = StatusEntry {
            host: "10.0.0.1".into(),
            source: "ess".into(),
            status_type: "subject".into(),
            value: "sally".into(),
            sys_time: Utc::now(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["host"], "10.0.0.1");
        assert_eq!(json["source"], "ess");
        assert_eq!(json["type"], "subject");
        assert_eq!(json["value"], "sally");
        assert!(json.get("sys_time").is_some());
    }

    #[test]
    fn test_comm_status_key() {
        let payload = serde_json::json!({"device": "rig-3", "address": "10.0.0.3", "ping_avg": 4});
        assert_eq!(comm_status_key(&payload), "rig-3|10.0.0.3");
    }

    #[test]
    fn test_perf_stats_key_missing_fields() {
        let payload = serde_json::json!({"host": "10.0.0.1", "subject": "sally"});
        assert_eq!(perf_stats_key(&payload), "10.0.0.1||sally|||");
    }
}
