//! Outbound transport boundary.
//!
//! A [`Transport`] is the exclusive writer for one consumer connection.
//! The stream session performs at most one write at a time through it and
//! ends it exactly once.

pub mod sse;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::Result;

/// Identifies the request a stream is answering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationContext {
    /// Request correlation identifier echoed in every frame envelope.
    pub request_id: String,
}

impl CorrelationContext {
    /// Context for an explicit request id.
    #[must_use]
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
        }
    }

    /// Context with a freshly minted request id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}

/// Connection to a single remote consumer.
pub trait Transport: Send + Sync {
    /// Write one encoded frame.
    ///
    /// Returns the id the receiving side assigned to the stream.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) when the
    /// write does not complete.
    fn write_frame(&self, frame: Bytes) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;

    /// Close the underlying connection. Writes after this fail.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) if the
    /// connection could not be shut down cleanly.
    fn end_stream(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
