//! Relational store access.
//!
//! The schema is external; this module only consumes it. Read-only browser
//! queries are wrapped in a `to_jsonb` projection so arbitrary SELECTs come
//! back as JSON rows without per-type decoding.

pub mod listener;

use crate::domain::error::GatewayError;
use crate::domain::status::StatusEntry;
use crate::ports::StatusWriter;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::info;

/// Store handle shared across the service.
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect a small pool; LISTEN connections are created separately.
    pub async fn connect(url: &str) -> Result<Self, GatewayError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        info!("Store connection pool ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Addresses of all registered devices.
    pub async fn load_device_addresses(&self) -> Result<Vec<String>, GatewayError> {
        let rows = sqlx::query("SELECT address FROM devices ORDER BY address")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.try_get::<String, _>("address").ok())
            .collect())
    }

    /// Register a device (idempotent on address).
    pub async fn add_device(&self, name: &str, address: &str) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO devices (device, address) VALUES ($1, $2) \
             ON CONFLICT (address) DO UPDATE SET device = EXCLUDED.device",
        )
        .bind(name)
        .bind(address)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist one probe cycle's aggregates for a device. `last_ping` moves
    /// only when the most recent probe succeeded.
    pub async fn upsert_comm_status(
        &self,
        address: &str,
        ping_avg: i64,
        ping_success: f64,
        last_probe_succeeded: bool,
    ) -> Result<(), GatewayError> {
        let sql = if last_probe_succeeded {
            "UPDATE devices SET ping_avg = $2, ping_success = $3, \
             server_time = now(), last_ping = now() WHERE address = $1"
        } else {
            "UPDATE devices SET ping_avg = $2, ping_success = $3, \
             server_time = now() WHERE address = $1"
        };
        sqlx::query(sql)
            .bind(address)
            .bind(ping_avg)
            .bind(ping_success)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fetch a full status row (used for `new_image` notifications, whose
    /// payload names the row but omits the potentially large value).
    pub async fn fetch_status_row(
        &self,
        host: &str,
        status_type: &str,
    ) -> Result<Option<Value>, GatewayError> {
        let row = sqlx::query(
            "SELECT to_jsonb(s) AS row FROM ( \
               SELECT host, status_source, status_type, status_value \
               FROM status WHERE host = $1 AND status_type = $2 LIMIT 1 \
             ) s",
        )
        .bind(host)
        .bind(status_type)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|r| r.try_get::<Value, _>("row").ok()))
    }

    /// Authoritative status upsert (the pluggable write path).
    pub async fn upsert_status(&self, entry: &StatusEntry) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO status (host, status_source, status_type, status_value, sys_time) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (host, status_source, status_type) \
             DO UPDATE SET status_value = EXCLUDED.status_value, sys_time = EXCLUDED.sys_time",
        )
        .bind(&entry.host)
        .bind(&entry.source)
        .bind(&entry.status_type)
        .bind(&entry.value)
        .bind(entry.sys_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Execute a validated read-only query, returning one JSON object per
    /// row with browser-friendly value coercion applied.
    pub async fn run_read_only(&self, statement: &str) -> Result<Vec<Value>, GatewayError> {
        let wrapped = format!("SELECT to_jsonb(q) AS row FROM ( {} ) q", statement);
        let rows = sqlx::query(&wrapped).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| r.try_get::<Value, _>("row").ok())
            .map(coerce_row)
            .collect())
    }
}

/// Store-backed status writer.
pub struct PgStatusWriter {
    store: Arc<Store>,
}

impl PgStatusWriter {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StatusWriter for PgStatusWriter {
    async fn upsert_status(&self, entry: &StatusEntry) -> Result<(), GatewayError> {
        self.store.upsert_status(entry).await
    }
}

/// Coerce every value of a result row for browser consumption.
fn coerce_row(row: Value) -> Value {
    match row {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, coerce_value(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Date-like strings are truncated to `YYYY-MM-DD`; numeric strings become
/// numbers when the round-trip is exact; everything else passes through.
fn coerce_value(value: Value) -> Value {
    let Value::String(s) = value else {
        return value;
    };

    if is_date_prefixed(&s) {
        return Value::String(s[..10].to_string());
    }

    if let Ok(i) = s.parse::<i64>() {
        if i.to_string() == s {
            return Value::Number(i.into());
        }
    }

    if let Ok(f) = s.parse::<f64>() {
        if f.is_finite() && f.to_string() == s {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Value::Number(n);
            }
        }
    }

    Value::String(s)
}

/// `YYYY-MM-DD` optionally followed by a time part.
fn is_date_prefixed(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() < 10 {
        return false;
    }
    if bytes.len() > 10 && bytes[10] != b'T' && bytes[10] != b' ' {
        return false;
    }
    bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..7].iter().all(u8::is_ascii_digit)
        && bytes[7] == b'-'
        && bytes[8..10].iter().all(u8::is_ascii_digit)
}
