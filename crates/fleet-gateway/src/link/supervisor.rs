//! Per-homebase connection supervisor.
//!
//! One supervised task per device owns the socket, the request table, the
//! chunk buffers, and every timer for that link; all state transitions
//! happen on this task (single writer). Callers interact through a cloneable
//! [`LinkHandle`] whose commands are serialized onto the task's inbox.

use crate::domain::backoff::ReconnectSchedule;
use crate::domain::chunks::ChunkAssembler;
use crate::domain::config::GatewayConfig;
use crate::domain::datapoint::{translate, Translated};
use crate::domain::error::LinkError;
use crate::hub::StatusHub;
use crate::link::protocol::{classify, Command, Inbound, SUBSCRIPTION_CATALOG};
use crate::link::requests::{EvalReply, RequestTable};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Deadline sweep cadence while the supervisor is running.
const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// Remote state polled every poll interval while Open.
const POLL_PUMP_VOLTAGE: &str = "pump_voltage";
const POLL_CHARGING: &str = "charging";

/// Commands accepted by a link supervisor.
pub enum LinkCommand {
    Eval {
        script: String,
        timeout: Option<Duration>,
        reply: EvalReply,
    },
}

/// Cloneable handle to one homebase link.
#[derive(Clone)]
pub struct LinkHandle {
    addr: String,
    tx: mpsc::UnboundedSender<LinkCommand>,
}

impl LinkHandle {
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Execute a script on the homebase.
    ///
    /// Queued when the link is down; fails fast with `QueueFull` when the
    /// wait queue is at capacity. `timeout` overrides the configured
    /// per-request default.
    pub async fn eval(
        &self,
        script: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Value, LinkError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(LinkCommand::Eval {
                script: script.into(),
                timeout,
                reply,
            })
            .map_err(|_| LinkError::Unavailable)?;
        rx.await.map_err(|_| LinkError::Unavailable)?
    }
}

/// Spawn the supervisor task for one device address.
pub fn spawn_link(
    addr: String,
    config: Arc<GatewayConfig>,
    hub: Arc<StatusHub>,
    shutdown: watch::Receiver<bool>,
) -> LinkHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = LinkHandle {
        addr: addr.clone(),
        tx,
    };

    let supervisor = LinkSupervisor {
        table: RequestTable::new(config.requests.max_in_flight, config.requests.max_queue),
        schedule: ReconnectSchedule::new(config.reconnect.clone()),
        chunks: ChunkAssembler::new(),
        addr,
        config,
        hub,
        rx,
        shutdown,
    };
    tokio::spawn(supervisor.run());

    handle
}

struct LinkSupervisor {
    addr: String,
    config: Arc<GatewayConfig>,
    hub: Arc<StatusHub>,
    rx: mpsc::UnboundedReceiver<LinkCommand>,
    table: RequestTable,
    chunks: ChunkAssembler,
    schedule: ReconnectSchedule,
    shutdown: watch::Receiver<bool>,
}

impl LinkSupervisor {
    async fn run(mut self) {
        info!(addr = %self.addr, "Homebase link supervisor started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let url = self.config.homebase.endpoint(&self.addr);
            debug!(addr = %self.addr, url = %url, "Dialing homebase");

            // The hard connect timeout drops the in-progress dial
            match tokio::time::timeout(
                self.config.homebase.connect_timeout(),
                connect_async(url.as_str()),
            )
            .await
            {
                Ok(Ok((ws, _response))) => {
                    info!(addr = %self.addr, "Homebase link open");
                    self.schedule.on_connected();
                    self.session(ws).await;
                    info!(addr = %self.addr, "Homebase link closed");
                }
                Ok(Err(e)) => {
                    debug!(addr = %self.addr, error = %e, "Dial failed");
                }
                Err(_) => {
                    debug!(addr = %self.addr, "Dial timed out");
                }
            }

            if *self.shutdown.borrow() {
                break;
            }

            let delay = self.schedule.next_delay(Instant::now());
            debug!(
                addr = %self.addr,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting after delay"
            );
            if self.idle_wait(delay).await {
                break;
            }
        }

        self.table.reject_all(LinkError::LinkClosed);
        info!(addr = %self.addr, "Homebase link supervisor stopped");
    }

    /// One open session, from subscribe seeding to socket loss.
    async fn session(&mut self, ws: WebSocketStream<MaybeTlsStream<TcpStream>>) {
        let (mut sink, mut stream) = ws.split();

        self.synthetic_status("ess", "connected", "1").await;

        if self.seed_subscriptions(&mut sink).await.is_err() {
            self.teardown().await;
            return;
        }

        let hb = self.config.homebase.heartbeat_interval();
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + hb, hb);
        let refresh = self.config.homebase.refresh_interval();
        let mut refresh_timer =
            tokio::time::interval_at(tokio::time::Instant::now() + refresh, refresh);
        let mut poll = tokio::time::interval(self.config.homebase.poll_interval());
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut pong_deadline: Option<Instant> = None;
        let mut last_rx = Instant::now();

        // Requests queued while the link was down go out now
        if self.drain_queue(&mut sink).await.is_err() {
            self.teardown().await;
            return;
        }

        loop {
            tokio::select! {
                frame = stream.next() => {
                    match frame {
                        Some(Ok(msg)) => {
                            last_rx = Instant::now();
                            match msg {
                                Message::Text(text) => {
                                    if self.dispatch_frame(&text, &mut sink).await.is_err() {
                                        break;
                                    }
                                }
                                Message::Binary(data) => {
                                    if let Ok(text) = String::from_utf8(data) {
                                        if self.dispatch_frame(&text, &mut sink).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                                Message::Ping(payload) => {
                                    if sink.send(Message::Pong(payload)).await.is_err() {
                                        break;
                                    }
                                }
                                Message::Pong(_) => {
                                    pong_deadline = None;
                                }
                                Message::Close(_) => break,
                                Message::Frame(_) => {}
                            }
                        }
                        Some(Err(e)) => {
                            debug!(addr = %self.addr, error = %e, "Socket error");
                            break;
                        }
                        None => break,
                    }
                }
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            self.accept_command(cmd);
                            if self.drain_queue(&mut sink).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                    pong_deadline =
                        Some(Instant::now() + self.config.homebase.heartbeat_timeout());
                }
                _ = refresh_timer.tick() => {
                    // Defensive refresh against missed pushes
                    if self.touch_catalog(&mut sink).await.is_err() {
                        break;
                    }
                }
                _ = poll.tick() => {
                    self.enqueue_state_polls();
                    if self.drain_queue(&mut sink).await.is_err() {
                        break;
                    }
                }
                _ = sweep.tick() => {
                    let now = Instant::now();
                    if self.table.sweep(now) > 0 && self.drain_queue(&mut sink).await.is_err() {
                        break;
                    }
                    if pong_deadline.is_some_and(|d| now >= d) {
                        warn!(addr = %self.addr, "Pong deadline missed, terminating link");
                        break;
                    }
                    if now.duration_since(last_rx) >= self.config.homebase.stale_after() {
                        warn!(addr = %self.addr, "No inbound frames, terminating stale link");
                        break;
                    }
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let _ = sink.close().await;
        self.teardown().await;
    }

    /// Subscribe to the fixed catalog, then touch each key to seed its
    /// current value.
    async fn seed_subscriptions(
        &mut self,
        sink: &mut WsSink,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        let every = self.config.homebase.subscribe_every_default;
        for &key in SUBSCRIPTION_CATALOG {
            let frame = Command::Subscribe {
                pattern: key,
                every,
            }
            .to_json();
            sink.send(Message::Text(frame)).await?;
        }
        self.touch_catalog(sink).await
    }

    async fn touch_catalog(
        &mut self,
        sink: &mut WsSink,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        for &key in SUBSCRIPTION_CATALOG {
            sink.send(Message::Text(Command::Touch { name: key }.to_json()))
                .await?;
        }
        Ok(())
    }

    /// Process one inbound text frame. Chunk payloads loop back through
    /// classification once complete.
    async fn dispatch_frame(
        &mut self,
        text: &str,
        sink: &mut WsSink,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        let mut current = text.to_string();
        loop {
            let inbound = match classify(&current) {
                Ok(inbound) => inbound,
                Err(e) => {
                    debug!(addr = %self.addr, error = %e, "Undecodable frame dropped");
                    return Ok(());
                }
            };

            match inbound {
                Inbound::Chunk {
                    message_id,
                    chunk_index,
                    total_chunks,
                    data,
                } => match self
                    .chunks
                    .accept(&message_id, chunk_index, total_chunks, &data)
                {
                    Ok(Some(payload)) => {
                        current = payload;
                        continue;
                    }
                    Ok(None) => return Ok(()),
                    Err(e) => {
                        debug!(addr = %self.addr, error = %e, "Chunk rejected");
                        return Ok(());
                    }
                },
                Inbound::Response {
                    request_id,
                    ok,
                    result,
                    error,
                } => {
                    if ok {
                        self.table.complete(&request_id, Ok(result));
                    } else {
                        self.table
                            .complete(&request_id, Err(LinkError::Remote(error.clone())));
                        self.hub.broadcast_remote_error(&error);
                    }
                    // A freed slot may admit a queued request
                    return self.drain_queue(sink).await;
                }
                Inbound::Datapoint { name, value } => {
                    if name.is_empty() {
                        debug!(addr = %self.addr, "Datapoint without a name dropped");
                        return Ok(());
                    }
                    self.hub.apply_status(&self.addr, translate(&name, &value)).await;
                    return Ok(());
                }
                Inbound::Ack { benign, raw } => {
                    if benign {
                        trace!(addr = %self.addr, "Control ack");
                    } else {
                        debug!(addr = %self.addr, ack = %raw, "Control ack reported an error");
                    }
                    return Ok(());
                }
                Inbound::Unrecognized(frame) => {
                    debug!(addr = %self.addr, frame = %frame, "Unrecognized frame dropped");
                    return Ok(());
                }
            }
        }
    }

    /// Send queued requests while in-flight slots are available.
    async fn drain_queue(
        &mut self,
        sink: &mut WsSink,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        while let Some(request) = self.table.pop_ready() {
            let request_id = Uuid::new_v4().to_string();
            let frame = Command::Eval {
                script: &request.script,
                request_id: &request_id,
            }
            .to_json();
            match sink.send(Message::Text(frame)).await {
                Ok(()) => self.table.track(request_id, request, Instant::now()),
                Err(e) => {
                    let _ = request.reply.send(Err(LinkError::LinkClosed));
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn accept_command(&mut self, cmd: LinkCommand) {
        match cmd {
            LinkCommand::Eval {
                script,
                timeout,
                reply,
            } => {
                let timeout = timeout.unwrap_or(self.config.requests.default_timeout());
                self.table.submit(script, timeout, reply);
            }
        }
    }

    /// Queue the periodic device-state evals. Their results come back as
    /// synthetic statuses; failures are swallowed.
    fn enqueue_state_polls(&mut self) {
        self.enqueue_poll(POLL_PUMP_VOLTAGE, "24v-v");
        self.enqueue_poll(POLL_CHARGING, "charging");
    }

    fn enqueue_poll(&mut self, script: &str, status_type: &'static str) {
        let (reply, rx) = oneshot::channel();
        self.table
            .submit(script.to_string(), self.config.requests.default_timeout(), reply);

        let hub = Arc::clone(&self.hub);
        let addr = self.addr.clone();
        tokio::spawn(async move {
            let value = match rx.await {
                Ok(Ok(value)) => value,
                _ => return,
            };
            if let Some(scalar) = eval_scalar(&value) {
                hub.apply_status(
                    &addr,
                    Translated {
                        source: "system".to_string(),
                        status_type: status_type.to_string(),
                        value: scalar,
                    },
                )
                .await;
            }
        });
    }

    async fn synthetic_status(&self, source: &str, status_type: &str, value: &str) {
        self.hub
            .apply_status(
                &self.addr,
                Translated {
                    source: source.to_string(),
                    status_type: status_type.to_string(),
                    value: value.to_string(),
                },
            )
            .await;
    }

    async fn teardown(&mut self) {
        // Decision: outstanding work fails immediately rather than running
        // out its deadlines
        self.table.reject_all(LinkError::LinkClosed);
        self.chunks.clear();
        self.synthetic_status("ess", "connected", "0").await;
    }

    /// Sleep out a reconnect delay while still accepting submissions and
    /// expiring deadlines.
    async fn idle_wait(&mut self, delay: Duration) -> bool {
        let deadline = tokio::time::sleep(delay);
        tokio::pin!(deadline);
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = &mut deadline => return false,
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(cmd) => self.accept_command(cmd),
                        None => return true,
                    }
                }
                _ = sweep.tick() => {
                    self.table.sweep(Instant::now());
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return true;
                    }
                }
            }
        }
    }
}

/// Pull a usable scalar out of an eval result, tolerating numeric, boolean,
/// and JSON-wrapped string returns.
fn eval_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            if let Ok(inner) = serde_json::from_str::<Value>(trimmed) {
                match inner {
                    Value::Number(n) => return Some(n.to_string()),
                    Value::Bool(b) => return Some(b.to_string()),
                    Value::String(s) => return Some(s),
                    _ => {}
                }
            }
            Some(trimmed.to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_eval_scalar_forms() {
        assert_eq!(eval_scalar(&json!(24.1)), Some("24.1".to_string()));
        assert_eq!(eval_scalar(&json!(true)), Some("true".to_string()));
        assert_eq!(eval_scalar(&json!("0")), Some("0".to_string()));
        assert_eq!(eval_scalar(&json!("3.3")), Some("3.3".to_string()));
        // JSON-wrapped returns unwrap one level
        assert_eq!(eval_scalar(&json!("\"24.1\"")), Some("24.1".to_string()));
        assert_eq!(eval_scalar(&json!("false")), Some("false".to_string()));
        assert_eq!(eval_scalar(&json!(null)), None);
        assert_eq!(eval_scalar(&json!({"a": 1})), None);
        assert_eq!(eval_scalar(&json!("")), None);
    }
}
