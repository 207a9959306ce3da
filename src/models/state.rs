//! Cumulative view of every fragment merged into a stream.

use serde::Serialize;
use serde_json::{Map, Value};

use super::fragment::{Attachment, Entity, Fragment};

/// Accumulator for one stream session.
///
/// Text, attachments, and entities only ever grow; side-channel keys are
/// last-write-wins. `sequence_index` counts successful sends and
/// `correlation_id` is captured once from the first successful send.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedState {
    /// Concatenation of all merged fragment texts, in enqueue order.
    pub text: String,
    /// All merged attachments, in enqueue order.
    pub attachments: Vec<Attachment>,
    /// Merged side-channel metadata.
    pub side_channel: Map<String, Value>,
    /// All merged entities, in enqueue order.
    pub entities: Vec<Entity>,
    /// Number of successful sends so far.
    pub sequence_index: u64,
    /// Server-issued id captured from the first successful send.
    pub correlation_id: Option<String>,
}

impl AggregatedState {
    /// Merge one fragment into the cumulative state.
    pub fn merge(&mut self, fragment: Fragment) {
        if let Some(text) = fragment.text {
            self.text.push_str(&text);
        }
        self.attachments.extend(fragment.attachments);
        self.entities.extend(fragment.entities);
        for (key, value) in fragment.side_channel {
            self.side_channel.insert(key, value);
        }
    }

    /// Record a successful send: capture the correlation id if this is the
    /// first one and advance the sequence index.
    ///
    /// Returns `true` when `server_id` became the correlation id.
    pub fn record_success(&mut self, server_id: &str) -> bool {
        let captured = if self.correlation_id.is_none() {
            self.correlation_id = Some(server_id.to_owned());
            true
        } else {
            false
        };
        self.sequence_index += 1;
        captured
    }

    /// Whether a correlation id has been captured.
    #[must_use]
    pub fn is_correlated(&self) -> bool {
        self.correlation_id.is_some()
    }

    /// Return every field to its initial empty value.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
