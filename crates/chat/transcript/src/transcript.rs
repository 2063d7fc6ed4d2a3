//! The transcript reconciler.
//!
//! Three sources of truth race for every sent message: the optimistic local
//! insert, the REST acknowledgment, and the broadcast echo delivered over
//! the socket (which may arrive before, after, or concurrently with the
//! ack). The transcript folds them into a single ordered message list with
//! no duplicates and no losses, regardless of arrival order.

use chrono::{DateTime, Utc};
use thiserror::Error;

use chat_wire::{ChatMessage, Role};

use crate::entry::{DeliveryStatus, MessageContent, TranscriptEntry};

/// Last-message summary shown on the conversation's queue card.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSummary {
    pub last_message: String,
    pub last_activity: DateTime<Utc>,
}

/// Outcome of folding one inbound chat frame into the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// The frame confirmed an optimistic entry in place.
    Reconciled { index: usize },
    /// The frame was a genuinely new inbound message.
    Appended { index: usize },
    /// The frame repeated an already-settled entry and was discarded.
    Duplicate,
}

/// Rejected explicit mutation of a settled entry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MutationError {
    #[error("no message with server id {0}")]
    NotFound(String),
    #[error("message {0} was not sent by the local operator")]
    NotPermitted(String),
}

/// Ordered message list for one conversation. Entries are exclusively owned
/// here; the send path and the inbound dispatch are the only mutators.
#[derive(Debug, Clone)]
pub struct Transcript {
    conversation_id: String,
    entries: Vec<TranscriptEntry>,
    summary: Option<ConversationSummary>,
}

impl Transcript {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            entries: Vec::new(),
            summary: None,
        }
    }

    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    #[must_use]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn summary(&self) -> Option<&ConversationSummary> {
        self.summary.as_ref()
    }

    /// Insert an optimistic entry at the tail, before any network round
    /// trip. Returns the entry index.
    pub fn push_optimistic(
        &mut self,
        content: MessageContent,
        sender: Role,
        client_id: impl Into<String>,
    ) -> usize {
        self.entries.push(TranscriptEntry {
            content,
            sender,
            timestamp: Utc::now(),
            status: DeliveryStatus::Sending,
            is_optimistic: true,
            client_id: Some(client_id.into()),
            server_id: None,
        });
        self.entries.len() - 1
    }

    /// Fold one inbound chat frame into the transcript.
    ///
    /// Correlation id equality is the strongest signal and is tried first;
    /// the content heuristic exists for legacy frames lacking a `clientId`
    /// and binds the first unmatched optimistic candidate only. A match is
    /// replaced in place so the rendered list does not jump. Unmatched
    /// frames are appended unless an already-settled entry carries the same
    /// sender and content (duplicate broadcast after reconnect replay).
    pub fn apply_echo(&mut self, frame: &ChatMessage) -> InboundOutcome {
        let matched = frame
            .client_id
            .as_deref()
            .and_then(|client_id| {
                self.entries
                    .iter()
                    .position(|entry| {
                        entry.is_optimistic && entry.client_id.as_deref() == Some(client_id)
                    })
            })
            .or_else(|| {
                self.entries.iter().position(|entry| {
                    entry.is_optimistic
                        && entry.sender == frame.sender
                        && entry.content.matches_frame(frame)
                })
            });

        if let Some(index) = matched {
            let entry = &mut self.entries[index];
            entry.content = MessageContent::from_frame(frame);
            entry.timestamp = frame.timestamp;
            entry.is_optimistic = false;
            entry.status = DeliveryStatus::Sent;
            self.touch_summary(index);
            return InboundOutcome::Reconciled { index };
        }

        let duplicate = self.entries.iter().any(|entry| {
            !entry.is_optimistic
                && entry.sender == frame.sender
                && entry.content.matches_frame(frame)
        });
        if duplicate {
            return InboundOutcome::Duplicate;
        }

        self.entries.push(TranscriptEntry {
            content: MessageContent::from_frame(frame),
            sender: frame.sender,
            timestamp: frame.timestamp,
            status: DeliveryStatus::Sent,
            is_optimistic: false,
            client_id: frame.client_id.clone(),
            server_id: None,
        });
        let index = self.entries.len() - 1;
        self.touch_summary(index);
        InboundOutcome::Appended { index }
    }

    /// REST acknowledgment for a locally sent message. Marks the entry sent
    /// and records the server-assigned id, but leaves `is_optimistic` alone:
    /// only the socket echo settles an entry.
    pub fn resolve_ack(&mut self, client_id: &str, server_id: Option<String>) -> bool {
        let Some(entry) = self.entry_by_client_id(client_id) else {
            return false;
        };
        if entry.server_id.is_none() {
            entry.server_id = server_id;
        }
        if entry.status == DeliveryStatus::Sending {
            entry.status = DeliveryStatus::Sent;
        }
        true
    }

    /// REST rejection for a locally sent message.
    pub fn resolve_failure(&mut self, client_id: &str) -> bool {
        let Some(entry) = self.entry_by_client_id(client_id) else {
            return false;
        };
        entry.status = DeliveryStatus::Failed;
        entry.is_optimistic = false;
        true
    }

    /// Verify an explicit mutation is allowed: the entry exists and was
    /// sent by the local operator.
    pub fn ensure_own_message(
        &self,
        server_id: &str,
        local_role: Role,
    ) -> Result<(), MutationError> {
        let entry = self
            .entries
            .iter()
            .find(|entry| entry.server_id.as_deref() == Some(server_id))
            .ok_or_else(|| MutationError::NotFound(server_id.to_string()))?;
        if entry.sender != local_role {
            return Err(MutationError::NotPermitted(server_id.to_string()));
        }
        Ok(())
    }

    /// Apply a REST-confirmed edit, keyed by the server-assigned id.
    pub fn apply_edit(
        &mut self,
        server_id: &str,
        new_text: &str,
        local_role: Role,
    ) -> Result<(), MutationError> {
        self.ensure_own_message(server_id, local_role)?;
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.server_id.as_deref() == Some(server_id))
        {
            entry.content = MessageContent::Text(new_text.to_string());
        }
        Ok(())
    }

    /// Apply a REST-confirmed delete, keyed by the server-assigned id.
    pub fn apply_delete(&mut self, server_id: &str, local_role: Role) -> Result<(), MutationError> {
        self.ensure_own_message(server_id, local_role)?;
        self.entries
            .retain(|entry| entry.server_id.as_deref() != Some(server_id));
        Ok(())
    }

    fn entry_by_client_id(&mut self, client_id: &str) -> Option<&mut TranscriptEntry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.client_id.as_deref() == Some(client_id))
    }

    fn touch_summary(&mut self, index: usize) {
        if let Some(entry) = self.entries.get(index) {
            self.summary = Some(ConversationSummary {
                last_message: entry.content.preview(),
                last_activity: entry.timestamp,
            });
        }
    }
}
