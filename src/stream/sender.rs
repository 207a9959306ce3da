//! One outbound write per flush cycle.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::models::{AggregatedState, Frame, FrameKind};
use crate::transport::{CorrelationContext, Transport};
use crate::Result;

/// Result of a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    /// Whether the frame was a progress or final update.
    pub kind: FrameKind,
    /// Sequence index the frame was sent with.
    pub sequence: u64,
    /// Id returned by the transport for this write.
    pub server_id: String,
    /// Correlation id of the session after this send.
    pub correlation_id: String,
    /// Length in bytes of the cumulative text carried by the frame.
    pub text_len: usize,
}

/// Builds frames from aggregated snapshots and writes them to the transport.
#[derive(Clone)]
pub struct TransportSender {
    transport: Arc<dyn Transport>,
    context: CorrelationContext,
}

impl TransportSender {
    /// Create a sender for the given transport and request context.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, context: CorrelationContext) -> Self {
        Self { transport, context }
    }

    /// Send the full snapshot as one frame.
    ///
    /// On success the correlation id is captured (first success only) and
    /// the sequence index advances. On failure `state` is left untouched.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Serialization` if the frame cannot be encoded, or
    /// the transport's error if the write fails.
    pub async fn send(&self, state: &mut AggregatedState, kind: FrameKind) -> Result<SendOutcome> {
        let sequence = state.sequence_index;
        let text_len = state.text.len();
        let bytes = Frame::from_state(&self.context.request_id, state, kind).encode()?;

        let server_id = self.transport.write_frame(bytes).await.map_err(|err| {
            warn!(request_id = %self.context.request_id, sequence, %err, "frame write failed");
            err
        })?;

        if state.record_success(&server_id) {
            debug!(request_id = %self.context.request_id, correlation_id = %server_id, "correlation id captured");
        }

        Ok(SendOutcome {
            kind,
            sequence,
            correlation_id: state.correlation_id.clone().unwrap_or_else(|| server_id.clone()),
            server_id,
            text_len,
        })
    }

    /// Ask the transport to close the connection.
    ///
    /// # Errors
    ///
    /// Propagates the transport's shutdown error.
    pub async fn end(&self) -> Result<()> {
        self.transport.end_stream().await
    }
}
