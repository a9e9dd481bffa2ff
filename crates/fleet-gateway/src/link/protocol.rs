//! Homebase wire protocol: outbound commands, inbound frame classification,
//! and the fixed subscription catalog.

use serde::Serialize;
use serde_json::Value;

/// Outbound command frames.
#[derive(Debug, Serialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum Command<'a> {
    /// Execute a remote script; a response with the same id is expected.
    Eval {
        script: &'a str,
        #[serde(rename = "requestId")]
        request_id: &'a str,
    },
    /// Subscribe to a key pattern.
    Subscribe {
        #[serde(rename = "match")]
        pattern: &'a str,
        every: u32,
    },
    /// Cancel a subscription.
    Unsubscribe {
        #[serde(rename = "match")]
        pattern: &'a str,
    },
    /// Request a one-shot push of the key's current value.
    Touch { name: &'a str },
}

impl Command<'_> {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("command serializes")
    }
}

/// Classified inbound frame.
#[derive(Debug)]
pub enum Inbound {
    /// Response to an `eval` request.
    Response {
        request_id: String,
        ok: bool,
        result: Value,
        error: String,
    },
    /// Pushed datapoint for a subscribed key.
    Datapoint { name: String, value: String },
    /// One piece of a chunked message.
    Chunk {
        message_id: String,
        chunk_index: usize,
        total_chunks: usize,
        data: String,
    },
    /// Control acknowledgement (subscribe/touch confirmations and the like).
    Ack { benign: bool, raw: Value },
    /// Anything else.
    Unrecognized(Value),
}

/// Classify a raw text frame.
///
/// Classification order matters: chunk envelopes first (their inner payload
/// re-enters here after reassembly), then responses by `requestId`, then
/// datapoints, then control acks.
pub fn classify(text: &str) -> Result<Inbound, serde_json::Error> {
    let frame: Value = serde_json::from_str(text)?;

    if frame
        .get("isChunkedMessage")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        return Ok(Inbound::Chunk {
            message_id: frame
                .get("messageId")
                .map(value_to_string)
                .unwrap_or_default(),
            chunk_index: frame
                .get("chunkIndex")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize,
            total_chunks: frame
                .get("totalChunks")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize,
            data: frame
                .get("data")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        });
    }

    if let Some(request_id) = frame.get("requestId").and_then(|v| v.as_str()) {
        if let Some(status) = frame.get("status").and_then(|v| v.as_str()) {
            return Ok(Inbound::Response {
                request_id: request_id.to_string(),
                ok: status == "ok",
                result: frame.get("result").cloned().unwrap_or(Value::Null),
                error: frame
                    .get("error")
                    .map(value_to_string)
                    .unwrap_or_else(|| "remote error".to_string()),
            });
        }
    }

    if frame.get("type").and_then(|v| v.as_str()) == Some("datapoint") {
        return Ok(Inbound::Datapoint {
            name: frame
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            value: frame.get("data").map(value_to_string).unwrap_or_default(),
        });
    }

    if frame.get("status").is_some() || frame.get("action").is_some() {
        let benign = is_benign_ack(&frame);
        return Ok(Inbound::Ack { benign, raw: frame });
    }

    Ok(Inbound::Unrecognized(frame))
}

/// Acks not worth logging above debug: plain confirmations, and the
/// "Datapoint not found" replies that touches produce for keys the remote
/// has not created yet.
fn is_benign_ack(frame: &Value) -> bool {
    match frame.get("status").and_then(|v| v.as_str()) {
        Some("ok") | None => true,
        Some(_) => frame
            .get("error")
            .map(value_to_string)
            .map(|e| e.contains("Datapoint not found"))
            .unwrap_or(false),
    }
}

/// Render a JSON value the way the status pipeline expects it: strings
/// unquoted, everything else as compact JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Keys subscribed (and touched) on every connect.
pub const SUBSCRIPTION_CATALOG: &[&str] = &[
    // System identity
    "system/hostname",
    "system/hostaddr",
    "system/os",
    // ESS identity and state
    "ess/subject",
    "ess/project",
    "ess/system",
    "ess/protocol",
    "ess/variant",
    "ess/systems",
    "ess/protocols",
    "ess/variants",
    "ess/state",
    "ess/status",
    "ess/running",
    "ess/remote",
    "ess/name",
    "ess/ipaddr",
    "ess/rmt_host",
    "ess/rmt_connected",
    // Observation counters
    "ess/obs_active",
    "ess/in_obs",
    "ess/obs_id",
    "ess/obs_total",
    "ess/obs_count",
    // File locations
    "ess/data_dir",
    "ess/datafile",
    "ess/lastfile",
    "ess/system_path",
    "ess/executable",
    // Git state
    "ess/git/status",
    "ess/git/branches",
    "ess/git/branch",
    "ess/git/tag",
    // Loading progress
    "ess/loading_start_time",
    "ess/loading_progress",
    "ess/loading_operation_id",
    // Parameters
    "ess/variant_info",
    "ess/param_settings",
    "ess/params",
    // Misc
    "ess/time",
    "ess/block_id",
    "ess/warningInfo",
    // Discovery
    "@keys",
];
