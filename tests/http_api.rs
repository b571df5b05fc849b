//! REST and WebSocket surface, served on an ephemeral port.

#![allow(clippy::panic)]

mod common;

use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::Value;
use telemetry_gateway::api;
use telemetry_gateway::app_state::AppState;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use common::{payload, settings, start};

async fn serve() -> String {
    let (pipeline, _store) = start(settings());
    let app = api::app(AppState::new(pipeline));
    let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind ephemeral port");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("local addr");
    };
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("127.0.0.1:{}", addr.port())
}

async fn get_json(url: &str) -> (u16, Value) {
    let Ok(resp) = reqwest::get(url).await else {
        panic!("GET {url} failed");
    };
    let status = resp.status().as_u16();
    let Ok(body) = resp.json::<Value>().await else {
        panic!("GET {url} returned no JSON");
    };
    (status, body)
}

#[tokio::test]
async fn health_and_stats() {
    let addr = serve().await;
    let (status, body) = get_json(&format!("http://{addr}/health")).await;
    assert_eq!(status, 200);
    assert_eq!(body.get("status"), Some(&Value::from("healthy")));

    let (status, body) = get_json(&format!("http://{addr}/api/v1/stats")).await;
    assert_eq!(status, 200);
    assert_eq!(body.get("messages_received"), Some(&Value::from(0)));
    assert_eq!(body.get("sessions"), Some(&Value::from(0)));
    assert_eq!(body.get("store_failures"), Some(&Value::from(0)));
}

#[tokio::test]
async fn telemetry_post_is_accepted_or_rejected() {
    let addr = serve().await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/v1/telemetry");

    let Ok(resp) = client.post(&url).body(payload(1, 0, r#""ph":7.0"#)).send().await else {
        panic!("POST failed");
    };
    assert_eq!(resp.status().as_u16(), 202);
    let Ok(body) = resp.json::<Value>().await else {
        panic!("no JSON body");
    };
    assert_eq!(body.get("sequence"), Some(&Value::from(1)));

    let Ok(resp) = client.post(&url).body("{oops").send().await else {
        panic!("POST failed");
    };
    assert_eq!(resp.status().as_u16(), 400);
    let Ok(body) = resp.json::<Value>().await else {
        panic!("no JSON body");
    };
    assert_eq!(body.pointer("/error/code"), Some(&Value::from(1002)));
}

#[tokio::test]
async fn device_alarms_are_404_until_seen() {
    let addr = serve().await;
    let (status, body) = get_json(&format!("http://{addr}/api/v1/devices/1/alarms")).await;
    assert_eq!(status, 404);
    assert_eq!(body.pointer("/error/code"), Some(&Value::from(2001)));

    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/v1/telemetry");
    let Ok(_) = client.post(&url).body(payload(1, 0, r#""flow":30"#)).send().await else {
        panic!("POST failed");
    };

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let (status, body) = get_json(&format!("http://{addr}/api/v1/devices/1/alarms")).await;
        if status == 200 && body.pointer("/alarms/0/status") == Some(&Value::from("active")) {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("alarm never became active: {body}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (status, body) = get_json(&format!("http://{addr}/api/v1/users/11/snapshot")).await;
    assert_eq!(status, 200);
    assert_eq!(body.pointer("/alarms/0/rule_id"), Some(&Value::from("flow-high")));
}

#[tokio::test]
async fn websocket_requires_user_header() {
    let addr = serve().await;
    let result = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await;
    let Err(WsError::Http(resp)) = result else {
        panic!("upgrade without identity should be refused");
    };
    assert_eq!(resp.status().as_u16(), 401);
}

#[tokio::test]
async fn websocket_streams_snapshot_then_live_events() {
    let addr = serve().await;
    let Ok(mut request) = format!("ws://{addr}/ws").into_client_request() else {
        panic!("build ws request");
    };
    request
        .headers_mut()
        .insert("x-user-id", HeaderValue::from_static("10"));
    let Ok((mut ws, _)) = tokio_tungstenite::connect_async(request).await else {
        panic!("ws upgrade failed");
    };

    let first = next_json(&mut ws).await;
    assert_eq!(first.get("type"), Some(&Value::from("snapshot")));

    let client = reqwest::Client::new();
    let Ok(_) = client
        .post(format!("http://{addr}/api/v1/telemetry"))
        .body(payload(1, 0, r#""ph":7.1"#))
        .send()
        .await
    else {
        panic!("POST failed");
    };

    let mut seen = Vec::new();
    while !seen.iter().any(|t| t == "sensor_update") {
        let frame = next_json(&mut ws).await;
        if let Some(kind) = frame.get("type").and_then(Value::as_str) {
            seen.push(kind.to_string());
        }
    }
    assert_eq!(seen.first().map(String::as_str), Some("device_status"));

    let Ok(()) = ws.send(Message::text(r#"{"type":"ping"}"#)).await else {
        panic!("send ping");
    };
    let pong = next_json(&mut ws).await;
    assert_eq!(pong.get("type"), Some(&Value::from("pong")));

    let Ok(()) = ws.send(Message::text(r#"{"type":"snapshot"}"#)).await else {
        panic!("send snapshot request");
    };
    let snapshot = next_json(&mut ws).await;
    assert_eq!(snapshot.get("type"), Some(&Value::from("snapshot")));
    assert_eq!(snapshot.pointer("/devices/0/status"), Some(&Value::from("online")));
}

async fn next_json<S>(ws: &mut S) -> Value
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let next = tokio::time::timeout(Duration::from_secs(2), ws.next()).await;
        let Ok(Some(Ok(msg))) = next else {
            panic!("no frame received");
        };
        if let Message::Text(text) = msg {
            let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
                panic!("frame is not JSON: {text}");
            };
            return value;
        }
    }
}
