//! Browser intent dispatch.
//!
//! Browsers send `{msg_type, ip?, msg}` frames; replies go to the
//! originating session only, while status effects flow through the hub to
//! everyone.

use crate::domain::datapoint::Translated;
use crate::domain::sql_guard::validate_read_only;
use crate::ws::server::AppState;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

type Reply = mpsc::UnboundedSender<String>;

/// Handle one inbound browser frame.
pub async fn handle_frame(text: &str, reply: &Reply, state: &AppState) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            send_error(reply, &format!("invalid JSON: {}", e));
            return;
        }
    };

    let msg_type = frame.get("msg_type").and_then(|v| v.as_str()).unwrap_or("");
    match msg_type {
        "esscmd" => run_command(state, reply, &frame, "esscmd").await,
        "gitcmd" => run_command(state, reply, &frame, "gitcmd").await,
        "AddDevice" => add_device(state, reply, &frame).await,
        "Addsubject" => add_subject(state, reply, &frame).await,
        "sql_query" => run_query(state, reply, &frame, "sql_table").await,
        "get_options" => run_query(state, reply, &frame, "listbox_options").await,
        other => {
            debug!(msg_type = other, "Unknown browser message type");
            send_error(reply, &format!("unknown msg_type: {}", other));
        }
    }
}

/// `esscmd`/`gitcmd`: forward a script to the target homebase over its link.
async fn run_command(state: &AppState, reply: &Reply, frame: &Value, kind: &str) {
    let Some(ip) = frame.get("ip").and_then(|v| v.as_str()) else {
        send_error(reply, "missing ip");
        return;
    };
    let Some(payload) = frame.get("msg").and_then(|v| v.as_str()) else {
        send_error(reply, "missing msg");
        return;
    };

    let script = if kind == "gitcmd" {
        format!("send git {{{}}}", payload)
    } else {
        payload.to_string()
    };

    let link = match state.registry.ensure(ip) {
        Ok(link) => link,
        Err(e) => {
            send_error(reply, &e.to_string());
            return;
        }
    };

    match link.eval(script, None).await {
        Ok(result) => {
            send(reply, json!({"type": "cmd_ok", "kind": kind, "ip": ip, "result": result}));
        }
        Err(e) => {
            send(
                reply,
                json!({"type": "cmd_error", "kind": kind, "ip": ip, "error": e.to_string()}),
            );
        }
    }
}

/// `AddDevice`: insert the registry row, then start its link.
async fn add_device(state: &AppState, reply: &Reply, frame: &Value) {
    let msg = frame.get("msg").cloned().unwrap_or(Value::Null);
    let address = msg
        .get("address")
        .and_then(|v| v.as_str())
        .or_else(|| frame.get("ip").and_then(|v| v.as_str()));
    let Some(address) = address else {
        send_error(reply, "missing device address");
        return;
    };
    let name = msg
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or(address);

    if let Err(e) = state.store.add_device(name, address).await {
        warn!(address, error = %e, "Device insert failed");
        send_error(reply, &e.to_string());
        return;
    }

    match state.registry.ensure(address) {
        Ok(_) => send(
            reply,
            json!({"type": "cmd_ok", "kind": "AddDevice", "ip": address}),
        ),
        Err(e) => send_error(reply, &e.to_string()),
    }
}

/// `Addsubject`: recompute the merged subject option list and push it to
/// every device.
async fn add_subject(state: &AppState, reply: &Reply, frame: &Value) {
    let Some(subject) = frame.get("msg").and_then(|v| v.as_str()) else {
        send_error(reply, "missing subject");
        return;
    };

    let cache = state.hub.cache();
    let lists: Vec<String> = state
        .registry
        .addresses()
        .iter()
        .filter_map(|addr| cache.get_value(addr, "ess", "animalOptions"))
        .collect();

    let merged = merge_subject_options(&lists, subject).join(",");

    for addr in state.registry.addresses() {
        state
            .hub
            .apply_status(
                &addr,
                Translated {
                    source: "ess".to_string(),
                    status_type: "animalOptions".to_string(),
                    value: merged.clone(),
                },
            )
            .await;
    }

    send(
        reply,
        json!({"type": "cmd_ok", "kind": "Addsubject", "result": merged}),
    );
}

/// `sql_query`/`get_options`: guarded read-only store query.
async fn run_query(state: &AppState, reply: &Reply, frame: &Value, reply_type: &str) {
    let Some(sql) = frame.get("msg").and_then(|v| v.as_str()) else {
        send_error(reply, "missing query");
        return;
    };

    let statement = match validate_read_only(sql) {
        Ok(statement) => statement,
        Err(e) => {
            send_error(reply, &e.to_string());
            return;
        }
    };

    match state.store.run_read_only(statement).await {
        Ok(rows) => send(reply, json!({"type": reply_type, "result": rows})),
        Err(e) => {
            warn!(error = %e, "Read-only query failed");
            send_error(reply, &e.to_string());
        }
    }
}

/// Merge comma-joined option lists: dedupe case-insensitively (first
/// spelling wins), drop empties, keep `test` first, and append the new
/// subject unless already present.
pub fn merge_subject_options(lists: &[String], new_subject: &str) -> Vec<String> {
    fn push_unique(option: &str, merged: &mut Vec<String>, seen: &mut Vec<String>) {
        let trimmed = option.trim();
        if trimmed.is_empty() {
            return;
        }
        let lower = trimmed.to_lowercase();
        if !seen.contains(&lower) {
            seen.push(lower);
            merged.push(trimmed.to_string());
        }
    }

    let mut seen: Vec<String> = vec!["test".to_string()];
    let mut merged: Vec<String> = vec!["test".to_string()];

    for list in lists {
        for option in list.split(',') {
            push_unique(option, &mut merged, &mut seen);
        }
    }
    push_unique(new_subject, &mut merged, &mut seen);

    merged
}

fn send(reply: &Reply, frame: Value) {
    let _ = reply.send(frame.to_string());
}

fn send_error(reply: &Reply, message: &str) {
    send(reply, json!({"type": "error", "message": message}));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_puts_test_first() {
        let merged = merge_subject_options(&[], "sally");
        assert_eq!(merged, vec!["test", "sally"]);
    }

    #[test]
    fn test_merge_dedupes_case_insensitively() {
        let lists = vec!["test,Sally,momo".to_string(), "sally,riker".to_string()];
        let merged = merge_subject_options(&lists, "MOMO");
        assert_eq!(merged, vec!["test", "Sally", "momo", "riker"]);
    }

    #[test]
    fn test_merge_strips_empties() {
        let lists = vec!["test,, sally ,".to_string()];
        let merged = merge_subject_options(&lists, "riker");
        assert_eq!(merged, vec!["test", "sally", "riker"]);
    }

    #[test]
    fn test_merge_appends_new_subject_once() {
        let lists = vec!["test,sally".to_string()];
        let merged = merge_subject_options(&lists, "sally");
        assert_eq!(merged, vec!["test", "sally"]);

        let merged = merge_subject_options(&lists, "Sally");
        assert_eq!(merged, vec!["test", "sally"]);
    }

    #[test]
    fn test_merge_handles_test_in_other_positions() {
        let lists = vec!["momo,test,sally".to_string()];
        let merged = merge_subject_options(&lists, "riker");
        assert_eq!(merged, vec!["test", "momo", "sally", "riker"]);
    }
}
