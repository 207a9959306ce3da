//! Send failures: backoff growth, correlation capture, and self-healing
//! retransmission of the cumulative snapshot.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use stream_relay::models::Fragment;
use stream_relay::stream::StreamEvent;

use super::test_helpers::{
    is_final, reference_config, sequence_of, spawn_session, spawn_session_with, text_of,
    ScriptedTransport,
};

#[tokio::test(start_paused = true)]
async fn correlation_id_comes_from_first_successful_send() {
    let transport = ScriptedTransport::scripted(&[true]);
    let (handle, _ct) = spawn_session(&transport);
    let start = Instant::now();

    handle.enqueue(Fragment::text("a")).expect("enqueue");
    let outcome = handle.close().await.expect("close");

    let attempts = transport.attempts();
    assert!(!attempts[0].accepted);
    assert!(attempts[1].accepted);
    // Failure at 200 ms, retry (2 + 1) * 500 ms later.
    assert_eq!(attempts[0].at - start, Duration::from_millis(200));
    assert_eq!(attempts[1].at - start, Duration::from_millis(1700));

    let terminal = outcome.terminal.expect("terminal frame");
    assert_eq!(terminal.correlation_id, "srv-2");

    let delivered = transport.delivered();
    assert_eq!(sequence_of(&delivered[0]), 0);
    assert!(delivered[0]["result"]["correlationId"].is_null());
    assert_eq!(delivered[1]["result"]["correlationId"], "srv-2");
}

#[tokio::test(start_paused = true)]
async fn consecutive_failures_back_off_linearly() {
    let transport = ScriptedTransport::scripted(&[true, true, true]);
    let (handle, _ct) = spawn_session(&transport);

    handle.enqueue(Fragment::text("a")).expect("enqueue");
    handle.close().await.expect("close");

    let attempts = transport.attempts();
    let gaps: Vec<_> = attempts.windows(2).take(3).map(|w| w[1].at - w[0].at).collect();
    assert_eq!(
        gaps,
        vec![
            Duration::from_millis(1500),
            Duration::from_millis(2500),
            Duration::from_millis(3500),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn success_resets_backoff() {
    let transport = ScriptedTransport::scripted(&[true, false, true]);
    let (handle, _ct) = spawn_session(&transport);

    for text in ["a", "b", "c"] {
        handle.enqueue(Fragment::text(text)).expect("enqueue");
    }
    handle.close().await.expect("close");

    let attempts = transport.attempts();
    // fail, ok with "c" still queued (normal interval), fail again from zero;
    // the terminal frame waits for the progress retry in the backoff slot.
    assert_eq!(attempts[1].at - attempts[0].at, Duration::from_millis(1500));
    assert_eq!(attempts[2].at - attempts[1].at, Duration::from_millis(500));
    assert_eq!(attempts[3].at - attempts[2].at, Duration::from_millis(1500));
    assert!(!is_final(&attempts[3].frame));
    assert!(is_final(&attempts[4].frame));
    assert_eq!(attempts[4].at, attempts[3].at);
}

#[tokio::test(start_paused = true)]
async fn retry_carries_content_from_failed_attempt() {
    let transport = ScriptedTransport::scripted(&[true]);
    let (handle, _ct) = spawn_session(&transport);

    handle.enqueue(Fragment::text("a")).expect("enqueue");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(transport.attempts().len(), 1);
    handle.enqueue(Fragment::text("b")).expect("enqueue");
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let delivered = transport.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(text_of(&delivered[0]), "ab", "nothing skipped after the failure");
    assert_eq!(sequence_of(&delivered[0]), 0);
}

#[tokio::test(start_paused = true)]
async fn events_report_chunks_failures_and_close() {
    let transport = ScriptedTransport::scripted(&[false, true]);
    let (tx, mut rx) = mpsc::channel(64);
    let (handle, _ct) = spawn_session_with(&transport, reference_config(), Some(tx));

    for text in ["a", "b"] {
        handle.enqueue(Fragment::text(text)).expect("enqueue");
    }
    handle.close().await.expect("close");

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    assert!(matches!(&events[0], StreamEvent::Chunk { outcome, .. } if outcome.sequence == 0));
    assert!(matches!(
        &events[1],
        StreamEvent::SendFailed { consecutive_failures: 2, retry_in, .. }
            if *retry_in == Duration::from_millis(1500)
    ));
    assert!(matches!(&events[2], StreamEvent::Chunk { outcome, .. } if outcome.sequence == 1));
    assert!(matches!(&events[3], StreamEvent::Close { session_id, outcome } if session_id == "s-test" && outcome.sequence == 2));
    assert_eq!(events.len(), 4);
}
