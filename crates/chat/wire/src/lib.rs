//! Wire-level protocol for the operator console realtime channel.
//!
//! One JSON frame per websocket message, discriminated by a `type` field.
//! This crate owns the typed frame definitions, the participant identity
//! model, and the frame parser used by the connection's dispatch loop.

pub mod envelope;
pub mod error;
pub mod identity;

pub use envelope::{
    ActivityPing, ChatMessage, ClientInfo, Envelope, Frame, MessageKind, NotificationsUpdate,
    PresenceUpdate, QueueUpdate, ReadReceipt, Role, parse_frame,
};
pub use error::{Result, WireError};
pub use identity::{AgentMetadata, Identity};
