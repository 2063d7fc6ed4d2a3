//! Transcript entry model.

use chrono::{DateTime, Utc};

use chat_wire::{ChatMessage, MessageKind, Role};

/// Delivery state of one transcript row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Failed,
}

/// Message body held by a transcript entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    Image {
        data: String,
        mime_type: String,
        filename: String,
    },
    Voice {
        data: String,
        mime_type: String,
    },
}

impl MessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text(body.into())
    }

    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::Image { .. } => MessageKind::Image,
            Self::Voice { .. } => MessageKind::Voice,
        }
    }

    /// Build content from a wire frame.
    pub fn from_frame(frame: &ChatMessage) -> Self {
        match frame.message_type {
            MessageKind::Text => Self::Text(frame.message.clone()),
            MessageKind::Image => Self::Image {
                data: frame.image_data.clone().unwrap_or_default(),
                mime_type: frame.mime_type.clone().unwrap_or_default(),
                filename: frame.filename.clone().unwrap_or_default(),
            },
            MessageKind::Voice => Self::Voice {
                data: frame.image_data.clone().unwrap_or_default(),
                mime_type: frame.mime_type.clone().unwrap_or_default(),
            },
        }
    }

    /// Content equality against a wire frame when no correlation id is
    /// available, following the same rule as `ChatMessage::content_key`:
    /// image frames compare by filename, voice frames by payload, text by
    /// literal body. Lossy by design; two identical texts from the same
    /// sender are indistinguishable without a correlation id.
    #[must_use]
    pub fn matches_frame(&self, frame: &ChatMessage) -> bool {
        if self.kind() != frame.message_type {
            return false;
        }
        match self {
            Self::Text(text) => frame.content_key() == text.as_str(),
            Self::Image { filename, .. } => frame.content_key() == filename.as_str(),
            Self::Voice { data, .. } => frame.content_key() == data.as_str(),
        }
    }

    /// One-line rendering for the conversation summary.
    #[must_use]
    pub fn preview(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Image { filename, .. } => filename.clone(),
            Self::Voice { .. } => "voice message".to_string(),
        }
    }
}

/// One row of a conversation transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub content: MessageContent,
    pub sender: Role,
    pub timestamp: DateTime<Utc>,
    pub status: DeliveryStatus,
    /// True between the local insert and the server echo. Once cleared the
    /// entry is immutable history apart from explicit edit/delete.
    pub is_optimistic: bool,
    pub client_id: Option<String>,
    /// Server-assigned id, learned from the REST ack. Edit/delete are keyed
    /// by this, never by `client_id`.
    pub server_id: Option<String>,
}
