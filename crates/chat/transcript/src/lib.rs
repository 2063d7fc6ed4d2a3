//! Optimistic message transcripts for the operator console.
//!
//! Sent messages appear in the transcript before the backend confirms
//! them. The [`Transcript`] reconciles the optimistic copy with the REST
//! acknowledgment and the socket echo in whatever order they arrive, and
//! [`ChatSession`] ties a transcript to the [`SendApi`] REST endpoints
//! for one conversation.
//!
//! This crate is transport-agnostic: the application forwards frames from
//! its socket subscriber into [`ChatSession::apply_echo`].

pub mod api;
pub mod entry;
pub mod session;
pub mod transcript;

pub use api::{
    ApiError, ConsoleApi, ConsoleApiConfig, SendApi, SendMessageAck, SendMessageRequest,
};
pub use entry::{DeliveryStatus, MessageContent, TranscriptEntry};
pub use session::{ChatSession, SendError, SessionError};
pub use transcript::{ConversationSummary, InboundOutcome, MutationError, Transcript};
