//! Server-Sent Events transport.
//!
//! Frames are pushed into a bounded channel whose receiving half is the
//! body of an HTTP response. Dropping the sending half ends the response.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;
use tracing::debug;

use super::{CorrelationContext, Transport};
use crate::config::TransportConfig;
use crate::{AppError, Result};

/// Body stream handed to the HTTP layer.
#[derive(Debug)]
pub struct FrameStream {
    rx: mpsc::Receiver<Bytes>,
}

impl Stream for FrameStream {
    type Item = std::result::Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

/// Transport writing SSE records into an HTTP response body.
#[derive(Debug)]
pub struct SseTransport {
    context: CorrelationContext,
    stream_id: String,
    frame_tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    write_timeout: Duration,
}

impl SseTransport {
    /// Open a stream for `context`, returning the transport and the body the
    /// HTTP layer should serve.
    #[must_use]
    pub fn open(context: CorrelationContext, config: &TransportConfig) -> (Self, FrameStream) {
        let (frame_tx, rx) = mpsc::channel(config.channel_capacity);
        let stream_id = uuid::Uuid::new_v4().to_string();
        debug!(request_id = %context.request_id, stream_id, "sse stream opened");
        (
            Self {
                context,
                stream_id,
                frame_tx: Mutex::new(Some(frame_tx)),
                write_timeout: config.write_timeout(),
            },
            FrameStream { rx },
        )
    }

    fn sender(&self) -> Option<mpsc::Sender<Bytes>> {
        self.frame_tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Transport for SseTransport {
    fn write_frame(&self, frame: Bytes) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(async move {
            let Some(tx) = self.sender() else {
                return Err(AppError::Transport("sse stream already ended".into()));
            };
            match tokio::time::timeout(self.write_timeout, tx.send(frame)).await {
                Ok(Ok(())) => Ok(self.stream_id.clone()),
                Ok(Err(_)) => Err(AppError::Transport("sse consumer disconnected".into())),
                Err(_) => Err(AppError::Transport(format!(
                    "sse write timed out after {}ms",
                    self.write_timeout.as_millis()
                ))),
            }
        })
    }

    fn end_stream(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let previous = self
                .frame_tx
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .take();
            if previous.is_some() {
                debug!(request_id = %self.context.request_id, "sse stream ended");
            }
            Ok(())
        })
    }
}
