//! Outbound frame envelope and SSE record encoding.
//!
//! Every frame is a JSON-RPC style envelope carrying the request
//! correlation identifier and a payload discriminated as either a
//! `progress` update or the single terminal `final` update. Frames are
//! written as `data: <json>\n\n` records.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use super::fragment::{Attachment, Entity};
use super::state::AggregatedState;
use crate::{AppError, Result};

/// SSE field marker prefixed to every record.
pub const SSE_DATA_PREFIX: &str = "data: ";

/// Payload discriminator.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// Non-terminal update carrying the cumulative state so far.
    Progress,
    /// Terminal update carrying the complete state.
    Final,
}

/// Frame payload borrowed from the aggregated state snapshot.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FramePayload<'a> {
    /// Progress or final.
    pub kind: FrameKind,
    /// Sequence index this frame is sent with.
    pub sequence: u64,
    /// Correlation id captured from an earlier send, if any.
    pub correlation_id: Option<&'a str>,
    /// Cumulative text.
    pub text: &'a str,
    /// Cumulative attachments.
    pub attachments: &'a [Attachment],
    /// Cumulative entities.
    pub entities: &'a [Entity],
    /// Merged side-channel metadata.
    pub side_channel: &'a Map<String, Value>,
    /// Completion marker; `true` only on the terminal frame.
    #[serde(rename = "final")]
    pub is_final: bool,
    /// Time the frame was built.
    pub timestamp: DateTime<Utc>,
}

/// Protocol envelope wrapping one payload.
#[derive(Debug, Serialize)]
pub struct Frame<'a> {
    jsonrpc: &'static str,
    /// Request correlation identifier of the originating call.
    pub id: &'a str,
    /// Progress or final payload.
    pub result: FramePayload<'a>,
}

impl<'a> Frame<'a> {
    /// Build a frame from the current aggregated snapshot.
    #[must_use]
    pub fn from_state(request_id: &'a str, state: &'a AggregatedState, kind: FrameKind) -> Self {
        Self {
            jsonrpc: "2.0",
            id: request_id,
            result: FramePayload {
                kind,
                sequence: state.sequence_index,
                correlation_id: state.correlation_id.as_deref(),
                text: &state.text,
                attachments: &state.attachments,
                entities: &state.entities,
                side_channel: &state.side_channel,
                is_final: kind == FrameKind::Final,
                timestamp: Utc::now(),
            },
        }
    }

    /// Serialize into a `data: <json>\n\n` record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Serialization` if the payload cannot be encoded.
    pub fn encode(&self) -> Result<Bytes> {
        let json = serde_json::to_string(self)?;
        let mut record = String::with_capacity(SSE_DATA_PREFIX.len() + json.len() + 2);
        record.push_str(SSE_DATA_PREFIX);
        record.push_str(&json);
        record.push_str("\n\n");
        Ok(Bytes::from(record))
    }
}

/// Parse every `data:` record in an SSE byte stream into JSON values.
///
/// # Errors
///
/// Returns `AppError::Serialization` if the input is not UTF-8 or a record
/// does not hold valid JSON.
pub fn decode_records(raw: &[u8]) -> Result<Vec<Value>> {
    let text = std::str::from_utf8(raw)
        .map_err(|err| AppError::Serialization(format!("frame is not utf-8: {err}")))?;
    text.split("\n\n")
        .filter_map(|record| record.trim().strip_prefix(SSE_DATA_PREFIX.trim_end()))
        .map(|json| serde_json::from_str(json.trim()).map_err(AppError::from))
        .collect()
}
