//! One open conversation: the transcript plus the REST send path.
//!
//! The session owns the optimistic lifecycle. `send_*` inserts locally
//! before the request goes out, then reconciles the REST outcome; the
//! socket echo arrives separately through [`ChatSession::apply_echo`].

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use chat_wire::{ChatMessage, Role};

use crate::api::{ApiError, SendApi, SendMessageRequest};
use crate::entry::MessageContent;
use crate::transcript::{InboundOutcome, MutationError, Transcript};

/// A send that was rejected by the backend. The entry stays in the
/// transcript marked failed; `client_id` identifies it for retry UI.
#[derive(Debug, Error)]
#[error("send {client_id} failed: {source}")]
pub struct SendError {
    pub client_id: String,
    #[source]
    pub source: ApiError,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Mutation(#[from] MutationError),
}

pub struct ChatSession<A: SendApi> {
    api: Arc<A>,
    local_role: Role,
    transcript: Transcript,
}

impl<A: SendApi> ChatSession<A> {
    pub fn new(api: Arc<A>, conversation_id: impl Into<String>, local_role: Role) -> Self {
        Self {
            api,
            local_role,
            transcript: Transcript::new(conversation_id),
        }
    }

    #[must_use]
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub async fn send_text(
        &mut self,
        message: impl Into<String>,
    ) -> Result<String, SendError> {
        self.send_content(MessageContent::text(message)).await
    }

    /// Send a message, inserting it optimistically first. Returns the
    /// correlation id on acceptance.
    pub async fn send_content(&mut self, content: MessageContent) -> Result<String, SendError> {
        let client_id = Uuid::new_v4().to_string();
        let request = build_request(&content, &client_id);
        self.transcript
            .push_optimistic(content, self.local_role, client_id.clone());

        let conversation_id = self.transcript.conversation_id().to_string();
        let mut outcome = self.api.send_message(&conversation_id, &request).await;

        // A thread that does not exist on the backend yet rejects plain
        // sends; text messages retry once through the first-contact route.
        if request.image_data.is_none()
            && let Err(ApiError::Http { status, .. }) = &outcome
            && matches!(status.as_u16(), 404 | 409)
        {
            debug!(%conversation_id, "send rejected, retrying as first contact");
            outcome = self
                .api
                .first_contact(&conversation_id, &request.message, &client_id)
                .await;
        }

        match outcome {
            Ok(ack) => {
                self.transcript.resolve_ack(&client_id, ack.message_id);
                Ok(client_id)
            }
            Err(source) => {
                warn!(%conversation_id, %client_id, error = %source, "send failed");
                self.transcript.resolve_failure(&client_id);
                Err(SendError { client_id, source })
            }
        }
    }

    /// Fold an inbound chat frame into the transcript. Frames addressed to
    /// another conversation are ignored.
    pub fn apply_echo(&mut self, frame: &ChatMessage) -> Option<InboundOutcome> {
        if frame.chat_id != self.transcript.conversation_id() {
            return None;
        }
        Some(self.transcript.apply_echo(frame))
    }

    pub async fn mark_read(&self) -> Result<(), ApiError> {
        self.api
            .mark_read(self.transcript.conversation_id())
            .await
    }

    /// Edit one of the operator's own messages, backend first.
    pub async fn edit(&mut self, message_id: &str, new_text: &str) -> Result<(), SessionError> {
        self.transcript
            .ensure_own_message(message_id, self.local_role)?;
        let conversation_id = self.transcript.conversation_id().to_string();
        self.api
            .edit_message(&conversation_id, message_id, new_text)
            .await?;
        self.transcript
            .apply_edit(message_id, new_text, self.local_role)?;
        Ok(())
    }

    /// Delete one of the operator's own messages, backend first.
    pub async fn delete(&mut self, message_id: &str) -> Result<(), SessionError> {
        self.transcript
            .ensure_own_message(message_id, self.local_role)?;
        let conversation_id = self.transcript.conversation_id().to_string();
        self.api.delete_message(&conversation_id, message_id).await?;
        self.transcript.apply_delete(message_id, self.local_role)?;
        Ok(())
    }
}

fn build_request(content: &MessageContent, client_id: &str) -> SendMessageRequest {
    match content {
        MessageContent::Text(body) => SendMessageRequest {
            message: body.clone(),
            message_type: None,
            client_id: client_id.to_string(),
            image_data: None,
            mime_type: None,
            filename: None,
        },
        MessageContent::Image {
            data,
            mime_type,
            filename,
        } => SendMessageRequest {
            message: String::new(),
            message_type: Some(chat_wire::MessageKind::Image),
            client_id: client_id.to_string(),
            image_data: Some(data.clone()),
            mime_type: Some(mime_type.clone()),
            filename: Some(filename.clone()),
        },
        MessageContent::Voice { data, mime_type } => SendMessageRequest {
            message: String::new(),
            message_type: Some(chat_wire::MessageKind::Voice),
            client_id: client_id.to_string(),
            image_data: Some(data.clone()),
            mime_type: Some(mime_type.clone()),
            filename: None,
        },
    }
}
