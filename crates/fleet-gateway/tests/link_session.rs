//! Link supervisor behavior against an in-process mock homebase.

use fleet_gateway::domain::config::GatewayConfig;
use fleet_gateway::hub::StatusHub;
use fleet_gateway::link::supervisor::spawn_link;
use fleet_gateway::link::LinkHandle;
use fleet_gateway::ports::SimulatedWriter;
use fleet_gateway::LinkError;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

/// Accept one homebase connection; parsed inbound frames go out on one
/// channel, frames pushed on the other are written to the client.
async fn mock_homebase() -> (
    u16,
    mpsc::UnboundedReceiver<Value>,
    mpsc::UnboundedSender<String>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut sink, mut stream) = ws.split();
        loop {
            tokio::select! {
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(frame) = serde_json::from_str::<Value>(&text) {
                            let _ = frames_tx.send(frame);
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
                out = push_rx.recv() => match out {
                    Some(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    });

    (port, frames_rx, push_tx)
}

fn test_config(port: u16) -> Arc<GatewayConfig> {
    let mut config = GatewayConfig::default();
    config.homebase.port = port;
    Arc::new(config)
}

struct Harness {
    link: LinkHandle,
    homebase_frames: mpsc::UnboundedReceiver<Value>,
    homebase_push: mpsc::UnboundedSender<String>,
    browser: mpsc::UnboundedReceiver<String>,
    _shutdown: watch::Sender<bool>,
}

async fn start_harness() -> Harness {
    let (port, homebase_frames, homebase_push) = mock_homebase().await;
    let hub = Arc::new(StatusHub::new(Arc::new(SimulatedWriter)));
    let (browser_tx, browser) = mpsc::unbounded_channel();
    hub.browsers().register(browser_tx);

    let (shutdown, shutdown_rx) = watch::channel(false);
    let link = spawn_link("127.0.0.1".into(), test_config(port), hub, shutdown_rx);

    Harness {
        link,
        homebase_frames,
        homebase_push,
        browser,
        _shutdown: shutdown,
    }
}

async fn next_homebase_frame(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("homebase frame timeout")
        .expect("homebase channel closed")
}

async fn next_browser_event(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
    let text = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("browser event timeout")
        .expect("browser channel closed");
    serde_json::from_str(&text).unwrap()
}

#[tokio::test]
async fn test_connect_seeds_catalog_and_synthesizes_connected() {
    let mut h = start_harness().await;

    // First browser event is the synthetic connected status
    let event = next_browser_event(&mut h.browser).await;
    assert_eq!(event["type"], "status_changes");
    assert_eq!(event["data"]["source"], "ess");
    assert_eq!(event["data"]["type"], "connected");
    assert_eq!(event["data"]["value"], "1");

    // Every catalog key is subscribed, then touched
    let mut subscribes = Vec::new();
    let mut touches = Vec::new();
    while touches.len() < 43 {
        let frame = next_homebase_frame(&mut h.homebase_frames).await;
        match frame["cmd"].as_str() {
            Some("subscribe") => subscribes.push(frame["match"].as_str().unwrap().to_string()),
            Some("touch") => touches.push(frame["name"].as_str().unwrap().to_string()),
            _ => {}
        }
    }
    assert_eq!(subscribes.len(), 43);
    assert!(subscribes.contains(&"ess/subject".to_string()));
    assert!(subscribes.contains(&"@keys".to_string()));
    assert_eq!(subscribes, touches);
}

#[tokio::test]
async fn test_datapoint_translation_and_dedupe() {
    let mut h = start_harness().await;
    let connected = next_browser_event(&mut h.browser).await;
    assert_eq!(connected["data"]["type"], "connected");

    let datapoint =
        json!({"type": "datapoint", "name": "ess/subject", "timestamp": 1, "dtype": 1, "data": "sally"});
    h.homebase_push.send(datapoint.to_string()).unwrap();

    let event = next_browser_event(&mut h.browser).await;
    assert_eq!(event["type"], "status_changes");
    assert_eq!(event["data"]["host"], "127.0.0.1");
    assert_eq!(event["data"]["source"], "ess");
    assert_eq!(event["data"]["type"], "subject");
    assert_eq!(event["data"]["value"], "sally");

    // An identical repeat is suppressed; the next change comes through in
    // order, proving nothing was broadcast in between
    h.homebase_push.send(datapoint.to_string()).unwrap();
    h.homebase_push
        .send(
            json!({"type": "datapoint", "name": "ess/subject", "data": "momo"}).to_string(),
        )
        .unwrap();

    let event = next_browser_event(&mut h.browser).await;
    assert_eq!(event["data"]["value"], "momo");
}

#[tokio::test]
async fn test_observation_datapoint_coercion() {
    let mut h = start_harness().await;
    let _connected = next_browser_event(&mut h.browser).await;

    h.homebase_push
        .send(json!({"type": "datapoint", "name": "ess/obs_active", "data": "1"}).to_string())
        .unwrap();
    let event = next_browser_event(&mut h.browser).await;
    assert_eq!(event["data"]["type"], "in_obs");
    assert_eq!(event["data"]["value"], "1");

    h.homebase_push
        .send(json!({"type": "datapoint", "name": "ess/obs_active", "data": "abc"}).to_string())
        .unwrap();
    let event = next_browser_event(&mut h.browser).await;
    assert_eq!(event["data"]["type"], "in_obs");
    assert_eq!(event["data"]["value"], "0");
}

#[tokio::test]
async fn test_eval_resolves_on_ok_response() {
    let mut h = start_harness().await;

    let link = h.link.clone();
    let eval = tokio::spawn(async move { link.eval("pumpQuery", None).await });

    // Find our eval frame among the seeding traffic
    let request_id = loop {
        let frame = next_homebase_frame(&mut h.homebase_frames).await;
        if frame["cmd"] == "eval" && frame["script"] == "pumpQuery" {
            break frame["requestId"].as_str().unwrap().to_string();
        }
    };

    h.homebase_push
        .send(json!({"requestId": request_id, "status": "ok", "result": "3.3"}).to_string())
        .unwrap();

    assert_eq!(eval.await.unwrap(), Ok(json!("3.3")));
}

#[tokio::test]
async fn test_eval_error_rejects_and_broadcasts_tcl_error() {
    let mut h = start_harness().await;
    let _connected = next_browser_event(&mut h.browser).await;

    let link = h.link.clone();
    let eval = tokio::spawn(async move { link.eval("badScript", None).await });

    let request_id = loop {
        let frame = next_homebase_frame(&mut h.homebase_frames).await;
        if frame["cmd"] == "eval" && frame["script"] == "badScript" {
            break frame["requestId"].as_str().unwrap().to_string();
        }
    };

    h.homebase_push
        .send(
            json!({"requestId": request_id, "status": "error", "error": "bad script"}).to_string(),
        )
        .unwrap();

    assert_eq!(
        eval.await.unwrap(),
        Err(LinkError::Remote("bad script".into()))
    );

    let event = next_browser_event(&mut h.browser).await;
    assert_eq!(event["type"], "TCL_ERROR");
    assert_eq!(event["data"], "bad script");
}

#[tokio::test]
async fn test_chunked_message_reassembly_out_of_order() {
    let mut h = start_harness().await;
    let _connected = next_browser_event(&mut h.browser).await;

    let parts = [
        "{\"t",
        "ype\":\"da",
        "tapoint\",\"name\":\"ess/state\",\"data\":\"running\"}",
    ];
    // Arrival order 1, 0, 2
    for index in [1usize, 0, 2] {
        h.homebase_push
            .send(
                json!({
                    "isChunkedMessage": true,
                    "messageId": "m",
                    "chunkIndex": index,
                    "totalChunks": 3,
                    "data": parts[index],
                })
                .to_string(),
            )
            .unwrap();
    }

    let event = next_browser_event(&mut h.browser).await;
    assert_eq!(event["type"], "status_changes");
    assert_eq!(event["data"]["source"], "ess");
    assert_eq!(event["data"]["type"], "state");
    assert_eq!(event["data"]["value"], "running");
}

#[tokio::test]
async fn test_control_acks_are_swallowed() {
    let mut h = start_harness().await;
    let _connected = next_browser_event(&mut h.browser).await;

    // Neither a subscribe ack nor a touch miss produces browser traffic
    h.homebase_push
        .send(json!({"status": "ok", "action": "subscribe"}).to_string())
        .unwrap();
    h.homebase_push
        .send(json!({"status": "error", "error": "Datapoint not found: ess/params"}).to_string())
        .unwrap();
    h.homebase_push
        .send(json!({"type": "datapoint", "name": "ess/running", "data": "1"}).to_string())
        .unwrap();

    let event = next_browser_event(&mut h.browser).await;
    assert_eq!(event["data"]["type"], "running");
}
