//! Persistent realtime connection for the operator console.
//!
//! This crate intentionally exposes a small surface:
//! - one long-lived websocket connection with an outbound queue
//! - reconnect with bounded exponential backoff
//! - typed channel subscriptions for inbound frames
//! - a liveness heartbeat for non-operator identities

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;

pub use config::{ChatClientConfig, reconnect_backoff};
pub use connection::{ChatConnection, ConnectionState, OutgoingMessage};
pub use dispatch::{Callback, MessageEvent, Subscription};
pub use error::{ClientError, Result};
