//! Frame definitions and the inbound frame parser.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, WireError};
use crate::identity::Identity;

/// Participant role on a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Agent,
    Customer,
}

/// Chat message payload kind. Frames that omit `messageType` are text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Voice,
}

/// Identity announcement. Sent on open, on identity change, and whenever the
/// viewed conversation changes so the server can route presence/read state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub user_id: String,
    pub role: Role,
    pub chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub agent_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub agent_name: Option<String>,
}

/// One chat message on the wire. `client_id` is the client-minted
/// correlation token; legacy frames may arrive without one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub chat_id: String,
    pub message: String,
    pub sender: Role,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub message_type: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub filename: Option<String>,
}

impl ChatMessage {
    /// Comparison key used when no correlation id is available: image frames
    /// compare by filename, voice frames by payload (their message body is
    /// empty on the wire), text by literal message body.
    #[must_use]
    pub fn content_key(&self) -> &str {
        match self.message_type {
            MessageKind::Image => self.filename.as_deref().unwrap_or(""),
            MessageKind::Voice => self
                .image_data
                .as_deref()
                .unwrap_or(self.message.as_str()),
            MessageKind::Text => self.message.as_str(),
        }
    }
}

/// Liveness ping for non-operator participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPing {
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Read receipt for a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub chat_id: String,
    pub sender: Role,
    pub timestamp: DateTime<Utc>,
}

/// Live queue snapshot. The payload shape is owned by the queue view, so the
/// transport keeps it opaque.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueUpdate {
    #[serde(flatten)]
    pub payload: serde_json::Map<String, Value>,
}

/// Notification list push.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationsUpdate {
    #[serde(default)]
    pub notifications: Vec<Value>,
}

/// Participant presence change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A typed wire frame, discriminated by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "client_info")]
    ClientInfo(ClientInfo),
    #[serde(rename = "chat_message")]
    Chat(ChatMessage),
    #[serde(rename = "user_activity")]
    Activity(ActivityPing),
    #[serde(rename = "message_read")]
    Read(ReadReceipt),
    #[serde(rename = "queue:update", alias = "live_queue_update")]
    QueueUpdate(QueueUpdate),
    #[serde(rename = "notifications_update")]
    Notifications(NotificationsUpdate),
    #[serde(rename = "user_presence", alias = "user_activity_update")]
    Presence(PresenceUpdate),
}

/// Frame `type` values this client understands.
const KNOWN_TYPES: &[&str] = &[
    "client_info",
    "chat_message",
    "user_activity",
    "message_read",
    "queue:update",
    "live_queue_update",
    "notifications_update",
    "user_presence",
    "user_activity_update",
];

impl Envelope {
    /// Build an identity announcement from the connection's identity and the
    /// currently viewed conversation.
    pub fn client_info(identity: &Identity, chat_id: Option<String>) -> Self {
        let metadata = identity.agent.clone().unwrap_or_default();
        Self::ClientInfo(ClientInfo {
            user_id: identity.participant_id.clone(),
            role: identity.role,
            chat_id,
            agent_id: metadata.agent_id,
            agent_code: metadata.agent_code,
            agent_name: metadata.agent_name,
        })
    }

    /// Wire discriminator for this frame.
    #[must_use]
    pub fn frame_type(&self) -> &'static str {
        match self {
            Self::ClientInfo(_) => "client_info",
            Self::Chat(_) => "chat_message",
            Self::Activity(_) => "user_activity",
            Self::Read(_) => "message_read",
            Self::QueueUpdate(_) => "queue:update",
            Self::Notifications(_) => "notifications_update",
            Self::Presence(_) => "user_presence",
        }
    }

    /// Serialize to the wire representation.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Result of parsing one inbound websocket text message.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A frame this client has typed knowledge of.
    Typed(Envelope),
    /// A structurally valid frame with an unrecognized `type`. Routed to the
    /// generic message channel so server additions degrade gracefully.
    Unknown { frame_type: String, payload: Value },
}

/// Parse one inbound frame.
///
/// Known `type` values must deserialize cleanly or the frame is rejected
/// with a protocol error naming the offending type. Unknown `type` values
/// are passed through as [`Frame::Unknown`] rather than dropped.
pub fn parse_frame(text: &str) -> Result<Frame> {
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(WireError::Protocol(
            "expected JSON object frame".to_string(),
        ));
    }

    let frame_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| WireError::Protocol("missing frame type".to_string()))?
        .to_string();

    if !KNOWN_TYPES.contains(&frame_type.as_str()) {
        return Ok(Frame::Unknown {
            frame_type,
            payload: value,
        });
    }

    let envelope: Envelope = serde_json::from_value(value).map_err(|error| {
        WireError::Protocol(format!("invalid {frame_type} frame: {error}"))
    })?;
    Ok(Frame::Typed(envelope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::AgentMetadata;
    use chrono::TimeZone;

    fn sample_timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 4, 12, 30, 0).single().unwrap_or_default()
    }

    fn sample_chat_message() -> ChatMessage {
        ChatMessage {
            chat_id: "chat-1".to_string(),
            message: "hello".to_string(),
            sender: Role::Agent,
            timestamp: sample_timestamp(),
            client_id: Some("c1".to_string()),
            message_type: MessageKind::Text,
            image_data: None,
            mime_type: None,
            filename: None,
        }
    }

    #[test]
    fn chat_frame_roundtrips_with_camel_case_fields() -> Result<()> {
        let envelope = Envelope::Chat(sample_chat_message());
        let text = envelope.to_json()?;
        assert!(text.contains(r#""type":"chat_message""#));
        assert!(text.contains(r#""chatId":"chat-1""#));
        assert!(text.contains(r#""clientId":"c1""#));
        // Optional image fields are omitted entirely for text messages.
        assert!(!text.contains("imageData"));

        match parse_frame(&text)? {
            Frame::Typed(Envelope::Chat(parsed)) => {
                assert_eq!(parsed, sample_chat_message());
            }
            other => return Err(WireError::Protocol(format!("unexpected frame: {other:?}"))),
        }
        Ok(())
    }

    #[test]
    fn client_info_carries_agent_metadata() -> Result<()> {
        let identity = Identity::agent(
            "agent-7",
            AgentMetadata {
                agent_id: Some("7".to_string()),
                agent_code: Some("A7".to_string()),
                agent_name: Some("Dana".to_string()),
            },
        );
        let text = Envelope::client_info(&identity, Some("chat-1".to_string())).to_json()?;
        assert!(text.contains(r#""type":"client_info""#));
        assert!(text.contains(r#""userId":"agent-7""#));
        assert!(text.contains(r#""role":"agent""#));
        assert!(text.contains(r#""agentCode":"A7""#));

        let text = Envelope::client_info(&Identity::customer("cust-1"), None).to_json()?;
        // chatId is nullable but always present.
        assert!(text.contains(r#""chatId":null"#));
        assert!(!text.contains("agentId"));
        Ok(())
    }

    #[test]
    fn message_type_defaults_to_text() -> Result<()> {
        let frame = parse_frame(
            r#"{"type":"chat_message","chatId":"chat-1","message":"hi","sender":"customer","timestamp":"2024-05-04T12:30:00Z"}"#,
        )?;
        match frame {
            Frame::Typed(Envelope::Chat(message)) => {
                assert_eq!(message.message_type, MessageKind::Text);
                assert_eq!(message.client_id, None);
            }
            other => return Err(WireError::Protocol(format!("unexpected frame: {other:?}"))),
        }
        Ok(())
    }

    #[test]
    fn queue_and_presence_aliases_parse_to_same_variant() -> Result<()> {
        let canonical = parse_frame(r#"{"type":"queue:update","waiting":3}"#)?;
        let alias = parse_frame(r#"{"type":"live_queue_update","waiting":3}"#)?;
        assert_eq!(canonical, alias);

        let presence = parse_frame(r#"{"type":"user_presence","userId":"u1","status":"online"}"#)?;
        let activity_alias =
            parse_frame(r#"{"type":"user_activity_update","userId":"u1","status":"online"}"#)?;
        assert_eq!(presence, activity_alias);
        match presence {
            Frame::Typed(Envelope::Presence(update)) => {
                assert_eq!(update.user_id.as_deref(), Some("u1"));
                assert_eq!(update.status.as_deref(), Some("online"));
            }
            other => return Err(WireError::Protocol(format!("unexpected frame: {other:?}"))),
        }
        Ok(())
    }

    #[test]
    fn unknown_type_falls_through_instead_of_failing() -> Result<()> {
        let frame = parse_frame(r#"{"type":"typing_indicator","chatId":"chat-1"}"#)?;
        match frame {
            Frame::Unknown {
                frame_type,
                payload,
            } => {
                assert_eq!(frame_type, "typing_indicator");
                assert_eq!(payload.get("chatId").and_then(Value::as_str), Some("chat-1"));
            }
            other => return Err(WireError::Protocol(format!("unexpected frame: {other:?}"))),
        }
        Ok(())
    }

    #[test]
    fn malformed_frames_are_rejected_with_context() {
        struct Case {
            name: &'static str,
            input: &'static str,
            expected_error_fragment: &'static str,
        }

        let cases = vec![
            Case {
                name: "non-object frame",
                input: r#"["chat_message"]"#,
                expected_error_fragment: "expected JSON object frame",
            },
            Case {
                name: "missing type",
                input: r#"{"chatId":"chat-1"}"#,
                expected_error_fragment: "missing frame type",
            },
            Case {
                name: "type is not a string",
                input: r#"{"type":42}"#,
                expected_error_fragment: "missing frame type",
            },
            Case {
                name: "chat message without chat id",
                input: r#"{"type":"chat_message","message":"hi","sender":"agent","timestamp":"2024-05-04T12:30:00Z"}"#,
                expected_error_fragment: "invalid chat_message frame",
            },
            Case {
                name: "read receipt with bad sender",
                input: r#"{"type":"message_read","chatId":"chat-1","sender":"robot","timestamp":"2024-05-04T12:30:00Z"}"#,
                expected_error_fragment: "invalid message_read frame",
            },
            Case {
                name: "activity ping without user",
                input: r#"{"type":"user_activity","timestamp":"2024-05-04T12:30:00Z"}"#,
                expected_error_fragment: "invalid user_activity frame",
            },
        ];

        for case in cases {
            let result = parse_frame(case.input);
            assert!(result.is_err(), "{}: expected an error", case.name);

            if let Err(error) = result {
                let rendered = error.to_string();
                assert!(
                    rendered.contains(case.expected_error_fragment),
                    "{}: expected error fragment '{}' in '{}'",
                    case.name,
                    case.expected_error_fragment,
                    rendered
                );
            }
        }
    }

    #[test]
    fn content_key_uses_filename_for_images() {
        let mut message = sample_chat_message();
        assert_eq!(message.content_key(), "hello");

        message.message_type = MessageKind::Image;
        message.filename = Some("photo.png".to_string());
        message.message = String::new();
        assert_eq!(message.content_key(), "photo.png");
    }

    #[test]
    fn content_key_uses_payload_for_voice() {
        let mut message = sample_chat_message();
        message.message_type = MessageKind::Voice;
        message.message = String::new();
        message.image_data = Some("b64-audio".to_string());
        message.mime_type = Some("audio/webm".to_string());
        assert_eq!(message.content_key(), "b64-audio");

        // A voice frame without a payload falls back to the message body.
        message.image_data = None;
        assert_eq!(message.content_key(), "");
    }
}
