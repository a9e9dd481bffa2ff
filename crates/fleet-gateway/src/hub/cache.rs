//! Deduplicating status cache and the browser-seeding snapshots.

use crate::domain::datapoint::canonical_value;
use crate::domain::status::{comm_status_key, perf_stats_key, StatusEntry, StatusKey};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;

/// Process-wide last-known state.
///
/// Three snapshots, one per browser stream: translated statuses (keyed by
/// host/source/type), comm status rows (device/address), and perf stats rows
/// (host/type/subject/system/protocol/variant). The status snapshot doubles
/// as the dedupe cache: unchanged writes are dropped before they reach the
/// broadcast path.
#[derive(Default)]
pub struct StatusCache {
    statuses: DashMap<StatusKey, StatusEntry>,
    comm: DashMap<String, Value>,
    perf: DashMap<String, Value>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a translated update.
    ///
    /// Returns the stamped entry when the value changed, `None` when the
    /// cached value already matches (no broadcast, no write).
    pub fn apply_status(
        &self,
        host: &str,
        source: &str,
        status_type: &str,
        value: &str,
    ) -> Option<StatusEntry> {
        let value = canonical_value(value);
        let key = StatusKey::new(host, source, status_type);

        if let Some(existing) = self.statuses.get(&key) {
            if existing.value == value {
                return None;
            }
        }

        let entry = StatusEntry {
            host: host.to_string(),
            source: source.to_string(),
            status_type: status_type.to_string(),
            value,
            sys_time: Utc::now(),
        };
        self.statuses.insert(key, entry.clone());
        Some(entry)
    }

    /// Apply a status row from a store notification.
    ///
    /// Notification payloads match on host + type; `status_source` is taken
    /// from the payload when present, otherwise inherited from the existing
    /// entry for that host + type (defaulting to `system`).
    pub fn apply_status_payload(&self, payload: &Value) -> Option<StatusEntry> {
        let host = payload.get("host")?.as_str()?;
        let status_type = payload.get("status_type")?.as_str()?;
        let value = json_scalar_to_string(payload.get("status_value")?);

        let source = payload
            .get("status_source")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| {
                self.statuses.iter().find_map(|e| {
                    (e.key().host == host && e.key().status_type == status_type)
                        .then(|| e.key().source.clone())
                })
            })
            .unwrap_or_else(|| "system".to_string());

        self.apply_status(host, &source, status_type, &value)
    }

    /// Merge a comm status row; returns the key it was stored under.
    pub fn apply_comm_payload(&self, payload: Value) -> String {
        let key = comm_status_key(&payload);
        self.comm.insert(key.clone(), payload);
        key
    }

    /// Merge a perf stats row; rows with `trials == 0` are removed.
    pub fn apply_perf_payload(&self, payload: Value) {
        let key = perf_stats_key(&payload);
        let trials = payload.get("trials").and_then(|v| v.as_i64());
        if trials == Some(0) {
            self.perf.remove(&key);
        } else {
            self.perf.insert(key, payload);
        }
    }

    /// Snapshot of every status entry (one per key).
    pub fn status_snapshot(&self) -> Vec<StatusEntry> {
        self.statuses.iter().map(|e| e.value().clone()).collect()
    }

    pub fn comm_snapshot(&self) -> Vec<Value> {
        self.comm.iter().map(|e| e.value().clone()).collect()
    }

    pub fn perf_snapshot(&self) -> Vec<Value> {
        self.perf.iter().map(|e| e.value().clone()).collect()
    }

    /// Look up a cached value (used for the subject-option rules).
    pub fn get_value(&self, host: &str, source: &str, status_type: &str) -> Option<String> {
        self.statuses
            .get(&StatusKey::new(host, source, status_type))
            .map(|e| e.value.clone())
    }

    pub fn status_count(&self) -> usize {
        self.statuses.len()
    }
}

/// Render a JSON scalar the way it is cached (strings unquoted, the rest as
/// compact JSON).
fn json_scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
