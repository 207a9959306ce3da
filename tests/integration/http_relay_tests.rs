//! End-to-end tests for the HTTP relay: health probe and SSE streaming.
//!
//! Uses an ephemeral port and a fast cadence so the tests run on the real
//! clock in well under a second.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use stream_relay::config::{RelayConfig, StreamConfig};
use stream_relay::http::serve_listener;
use stream_relay::models::frame::decode_records;

use super::test_helpers::{is_final, text_of};

fn fast_config() -> RelayConfig {
    RelayConfig {
        stream: StreamConfig {
            debounce_ms: 10,
            interval_ms: 20,
            backoff_unit_ms: 20,
            ..StreamConfig::default()
        },
        ..RelayConfig::default()
    }
}

/// Spawn the relay on an ephemeral port, returning its base URL.
async fn spawn_server() -> (String, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral");
    let addr = listener.local_addr().expect("local addr");
    let ct = CancellationToken::new();
    let server_ct = ct.clone();
    tokio::spawn(async move {
        let _ = serve_listener(listener, Arc::new(fast_config()), server_ct).await;
    });
    (format!("http://{addr}"), ct)
}

#[tokio::test]
async fn health_returns_ok() {
    let (base, ct) = spawn_server().await;

    let response = reqwest::get(format!("{base}/health")).await.expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.expect("body"), "ok");

    ct.cancel();
}

#[tokio::test]
async fn relay_streams_progress_then_single_final_frame() {
    let (base, ct) = spawn_server().await;

    let response = reqwest::Client::new()
        .post(format!("{base}/v1/relay"))
        .json(&serde_json::json!({
            "requestId": "req-42",
            "fragments": [
                {"text": "Hel"},
                {"text": "lo, "},
                {"text": "world", "sideChannel": {"model": "demo"}}
            ],
            "delayMs": 5
        }))
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers()[reqwest::header::CONTENT_TYPE],
        "text/event-stream"
    );

    let body = response.bytes().await.expect("body");
    let frames = decode_records(&body).expect("sse records");

    assert!(frames.len() >= 2);
    assert!(frames.iter().all(|frame| frame["id"] == "req-42"));
    let last = frames.last().expect("frames");
    assert!(is_final(last));
    assert_eq!(text_of(last), "Hello, world");
    assert_eq!(last["result"]["sideChannel"]["model"], "demo");
    assert_eq!(frames.iter().filter(|frame| is_final(frame)).count(), 1);

    ct.cancel();
}

#[tokio::test]
async fn relay_without_fragments_ends_empty() {
    let (base, ct) = spawn_server().await;

    let body = reqwest::Client::new()
        .post(format!("{base}/v1/relay"))
        .json(&serde_json::json!({ "fragments": [] }))
        .send()
        .await
        .expect("request")
        .bytes()
        .await
        .expect("body");

    assert!(decode_records(&body).expect("records").is_empty());

    ct.cancel();
}
