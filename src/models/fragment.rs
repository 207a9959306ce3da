//! Producer-side units of incremental output.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A file, card, or other rich payload attached to the response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// MIME type or card schema identifier.
    pub content_type: String,
    /// Location of externally hosted content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_url: Option<String>,
    /// Inline content (card body, small payloads).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Structured metadata describing the response (citations, mentions, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    /// Entity type discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// Free-form entity properties.
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

/// One incremental unit of producer output.
///
/// Fragments are immutable once built; the session consumes each exactly once
/// and only its merged content survives in the aggregated state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    /// Text delta appended to the cumulative response text.
    #[serde(default)]
    pub text: Option<String>,
    /// Attachments appended in order.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Side-channel metadata merged key-wise, later values win.
    #[serde(default)]
    pub side_channel: Map<String, Value>,
    /// Entities appended in order.
    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl Fragment {
    /// A fragment carrying only a text delta.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Add an attachment.
    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Add an entity.
    #[must_use]
    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }

    /// Set a side-channel key.
    #[must_use]
    pub fn with_side_channel(mut self, key: impl Into<String>, value: Value) -> Self {
        self.side_channel.insert(key.into(), value);
        self
    }
}
