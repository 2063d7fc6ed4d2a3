//! Typed REST client for the console's message endpoints.
//!
//! The socket is receive-mostly; sends, read receipts, and message
//! mutations go through HTTP so the backend can reject them (insufficient
//! coins, closed conversation) with a structured body.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use chat_wire::MessageKind;

pub const DEFAULT_API_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct ConsoleApiConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl ConsoleApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: DEFAULT_API_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("api base url is empty")]
    BaseUrlMissing,
    #[error("invalid api path: {0}")]
    InvalidPath(String),
    #[error("failed to initialize http client: {0}")]
    Init(String),
    #[error("request failed: {message}")]
    Request { message: String },
    #[error("failed to read response body: {message}")]
    Read { message: String },
    #[error("http {status}: {body}")]
    Http {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("failed to decode response: {message}")]
    Decode { message: String },
    #[error("insufficient coins (balance: {user_coins})")]
    InsufficientCoins { user_coins: i64 },
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Body for `POST /chats/{id}/message`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageKind>,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Acknowledgment for an accepted send. Older backend builds return an
/// empty body, so every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageAck {
    pub message_id: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RejectionBody {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(rename = "userCoins")]
    user_coins: Option<i64>,
}

/// Message endpoints the session layer depends on. Tests substitute a
/// scripted implementation.
#[async_trait]
pub trait SendApi: Send + Sync {
    async fn send_message(
        &self,
        conversation_id: &str,
        request: &SendMessageRequest,
    ) -> Result<SendMessageAck>;

    /// Opens a conversation that has no thread on the backend yet.
    async fn first_contact(
        &self,
        conversation_id: &str,
        message: &str,
        client_id: &str,
    ) -> Result<SendMessageAck>;

    async fn mark_read(&self, conversation_id: &str) -> Result<()>;

    async fn edit_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        message: &str,
    ) -> Result<()>;

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<()>;
}

/// Reqwest-backed [`SendApi`] implementation.
#[derive(Debug, Clone)]
pub struct ConsoleApi {
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl ConsoleApi {
    pub fn new(config: &ConsoleApiConfig) -> Result<Self> {
        let base_url = normalize_base_url(&config.base_url)?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|error| ApiError::Init(error.to_string()))?;
        Ok(Self {
            base_url,
            timeout: Duration::from_millis(config.timeout_ms),
            http,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<String> {
        if path.is_empty() {
            return Err(ApiError::InvalidPath(path.to_string()));
        }
        let suffix = path.trim_start_matches('/');
        Ok(format!("{}/{}", self.base_url, suffix))
    }

    async fn execute<T>(&self, request: reqwest::RequestBuilder) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let response = request
            .header("x-request-id", request_id())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| ApiError::Request {
                message: error.to_string(),
            })?;
        decode_response(response).await
    }
}

#[async_trait]
impl SendApi for ConsoleApi {
    async fn send_message(
        &self,
        conversation_id: &str,
        request: &SendMessageRequest,
    ) -> Result<SendMessageAck> {
        let url = self.endpoint(&send_message_path(conversation_id))?;
        self.execute(self.http.post(url).json(request)).await
    }

    async fn first_contact(
        &self,
        conversation_id: &str,
        message: &str,
        client_id: &str,
    ) -> Result<SendMessageAck> {
        let url = self.endpoint(&first_contact_path(conversation_id))?;
        let body = serde_json::json!({
            "message": message,
            "clientId": client_id,
        });
        self.execute(self.http.post(url).json(&body)).await
    }

    async fn mark_read(&self, conversation_id: &str) -> Result<()> {
        let url = self.endpoint(&mark_read_path(conversation_id))?;
        let _: IgnoredBody = self.execute(self.http.post(url)).await?;
        Ok(())
    }

    async fn edit_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        message: &str,
    ) -> Result<()> {
        let url = self.endpoint(&message_path(conversation_id, message_id))?;
        let body = serde_json::json!({ "message": message });
        let _: IgnoredBody = self.execute(self.http.patch(url).json(&body)).await?;
        Ok(())
    }

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        let url = self.endpoint(&message_path(conversation_id, message_id))?;
        let _: IgnoredBody = self.execute(self.http.delete(url)).await?;
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct IgnoredBody {}

fn request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

fn send_message_path(conversation_id: &str) -> String {
    format!("/chats/{conversation_id}/message")
}

fn first_contact_path(conversation_id: &str) -> String {
    format!("/chats/{conversation_id}/first-contact")
}

fn mark_read_path(conversation_id: &str) -> String {
    format!("/chats/{conversation_id}/mark-read")
}

fn message_path(conversation_id: &str, message_id: &str) -> String {
    format!("/chats/{conversation_id}/message/{message_id}")
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ApiError::BaseUrlMissing);
    }
    Ok(trimmed.to_string())
}

async fn decode_response<T>(response: reqwest::Response) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let status = response.status();
    let body = response.text().await.map_err(|error| ApiError::Read {
        message: error.to_string(),
    })?;

    if !status.is_success() {
        if let Ok(rejection) = serde_json::from_str::<RejectionBody>(&body)
            && rejection.kind.as_deref() == Some("INSUFFICIENT_COINS")
        {
            return Err(ApiError::InsufficientCoins {
                user_coins: rejection.user_coins.unwrap_or(0),
            });
        }
        return Err(ApiError::Http { status, body });
    }

    if body.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&body).map_err(|error| ApiError::Decode {
        message: error.to_string(),
    })
}
