//! Shared helpers for stream session integration tests.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use stream_relay::config::StreamConfig;
use stream_relay::models::frame::decode_records;
use stream_relay::stream::sender::TransportSender;
use stream_relay::stream::{StreamEvent, StreamHandle, StreamSession};
use stream_relay::transport::{CorrelationContext, Transport};
use stream_relay::{AppError, Result};

/// One write attempt observed by [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct WriteAttempt {
    /// When the attempt happened.
    pub at: Instant,
    /// Whether the transport accepted it.
    pub accepted: bool,
    /// Decoded envelope.
    pub frame: Value,
}

/// Transport that fails according to a script and records every attempt.
///
/// Each attempt `n` (1-based) that succeeds returns `srv-{n}` as its id.
#[derive(Default)]
pub struct ScriptedTransport {
    failures: Mutex<VecDeque<bool>>,
    always_fail: AtomicBool,
    attempts: Mutex<Vec<WriteAttempt>>,
    counter: AtomicUsize,
    ended: AtomicBool,
}

impl ScriptedTransport {
    /// Transport that accepts every write.
    pub fn reliable() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transport whose first attempts follow `script` (`true` = fail).
    pub fn scripted(script: &[bool]) -> Arc<Self> {
        let transport = Self::default();
        transport
            .failures
            .lock()
            .unwrap()
            .extend(script.iter().copied());
        Arc::new(transport)
    }

    /// Transport that rejects every write.
    pub fn broken() -> Arc<Self> {
        let transport = Self::default();
        transport.always_fail.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    /// Every attempt, accepted or not.
    pub fn attempts(&self) -> Vec<WriteAttempt> {
        self.attempts.lock().unwrap().clone()
    }

    /// Envelopes of accepted writes, in order.
    pub fn delivered(&self) -> Vec<Value> {
        self.attempts()
            .into_iter()
            .filter(|attempt| attempt.accepted)
            .map(|attempt| attempt.frame)
            .collect()
    }

    /// Whether `end_stream` was called.
    pub fn ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    fn write_frame(&self, frame: Bytes) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(async move {
            let attempt = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            let fail = self.always_fail.load(Ordering::SeqCst)
                || self.failures.lock().unwrap().pop_front().unwrap_or(false);
            let mut records = decode_records(&frame).expect("valid frame");
            assert_eq!(records.len(), 1, "one record per write");
            self.attempts.lock().unwrap().push(WriteAttempt {
                at: Instant::now(),
                accepted: !fail,
                frame: records.remove(0),
            });
            if fail {
                Err(AppError::Transport(format!("scripted failure on attempt {attempt}")))
            } else {
                Ok(format!("srv-{attempt}"))
            }
        })
    }

    fn end_stream(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.ended.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Stream settings matching the reference cadence.
pub fn reference_config() -> StreamConfig {
    StreamConfig::default()
}

/// Spawn a session over `transport` with the reference cadence.
pub fn spawn_session(transport: &Arc<ScriptedTransport>) -> (StreamHandle, CancellationToken) {
    spawn_session_with(transport, reference_config(), None)
}

/// Spawn a session with explicit config and optional event channel.
pub fn spawn_session_with(
    transport: &Arc<ScriptedTransport>,
    config: StreamConfig,
    events: Option<mpsc::Sender<StreamEvent>>,
) -> (StreamHandle, CancellationToken) {
    let ct = CancellationToken::new();
    let sender = TransportSender::new(
        Arc::clone(transport) as Arc<dyn Transport>,
        CorrelationContext::new("req-test"),
    );
    let mut session = StreamSession::new("s-test".into(), config, sender, ct.clone());
    if let Some(tx) = events {
        session = session.with_events(tx);
    }
    (session.spawn(), ct)
}

/// Text carried by an envelope.
pub fn text_of(frame: &Value) -> &str {
    frame["result"]["text"].as_str().expect("text field")
}

/// Whether an envelope is the terminal frame.
pub fn is_final(frame: &Value) -> bool {
    frame["result"]["final"].as_bool().expect("final field")
}

/// Sequence index carried by an envelope.
pub fn sequence_of(frame: &Value) -> u64 {
    frame["result"]["sequence"].as_u64().expect("sequence field")
}
