//! Persistent realtime connection management.
//!
//! One `ChatConnection` per client process, constructed at application start
//! and injected into consumers. It owns the socket exclusively: identity,
//! the outbound queue, and reconnection all go through its methods.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use chrono::Utc;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use chat_wire::{
    ActivityPing, ChatMessage, Envelope, Identity, MessageKind, NotificationsUpdate,
    PresenceUpdate, QueueUpdate, ReadReceipt, Role, parse_frame,
};

use crate::config::{ChatClientConfig, reconnect_backoff};
use crate::dispatch::{Dispatcher, MessageEvent, Subscription};
use crate::error::{ClientError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A locally composed message handed to [`ChatConnection::send`].
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub text: String,
    pub kind: MessageKind,
    /// Correlation id; minted by `send` when absent.
    pub client_id: Option<String>,
    pub image_data: Option<String>,
    pub mime_type: Option<String>,
    pub filename: Option<String>,
}

impl OutgoingMessage {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            text: body.into(),
            ..Self::default()
        }
    }

    pub fn image(
        data: impl Into<String>,
        mime_type: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            kind: MessageKind::Image,
            image_data: Some(data.into()),
            mime_type: Some(mime_type.into()),
            filename: Some(filename.into()),
            ..Self::default()
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}

/// The process-wide realtime connection.
#[derive(Clone)]
pub struct ChatConnection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    url: Url,
    config: ChatClientConfig,
    state: RwLock<ConnectionState>,
    writer: Mutex<Option<WsWriter>>,
    identity: RwLock<Option<Identity>>,
    current_conversation: RwLock<Option<String>>,
    queue: Mutex<VecDeque<Envelope>>,
    reconnect_attempts: AtomicU32,
    reconnecting: AtomicBool,
    auto_reconnect: AtomicBool,
    dispatcher: Dispatcher,
    connect_lock: Mutex<()>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChatConnection {
    /// Create a disconnected connection for the given endpoint.
    pub fn new(config: ChatClientConfig) -> Result<Self> {
        let url = Url::parse(&config.url)?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(ClientError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                url.scheme()
            )));
        }

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                url,
                config,
                state: RwLock::new(ConnectionState::Disconnected),
                writer: Mutex::new(None),
                identity: RwLock::new(None),
                current_conversation: RwLock::new(None),
                queue: Mutex::new(VecDeque::new()),
                reconnect_attempts: AtomicU32::new(0),
                reconnecting: AtomicBool::new(false),
                auto_reconnect: AtomicBool::new(false),
                dispatcher: Dispatcher::new(),
                connect_lock: Mutex::new(()),
                recv_task: Mutex::new(None),
                heartbeat_task: Mutex::new(None),
            }),
        })
    }

    /// Current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.inner.state.read().await
    }

    /// Open the socket. Idempotent: concurrent callers share one attempt and
    /// a call while already connected returns without opening a second
    /// socket. On open the identity is announced, the outbound queue is
    /// flushed FIFO, and the heartbeat publisher starts for non-operator
    /// identities.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.inner.connect_lock.lock().await;
        if *self.inner.state.read().await == ConnectionState::Connected {
            return Ok(());
        }
        self.inner.auto_reconnect.store(true, Ordering::SeqCst);
        ConnectionInner::open_socket(&self.inner).await
    }

    /// Update identity and announce it, queueing the announcement while
    /// disconnected. The queue holds at most one unsent announcement; the
    /// latest identity wins.
    pub async fn set_identity(&self, identity: Identity) {
        *self.inner.identity.write().await = Some(identity);
        ConnectionInner::announce_identity(&self.inner).await;
        if *self.inner.state.read().await == ConnectionState::Connected {
            // Role may have changed; the heartbeat rules follow it.
            ConnectionInner::start_heartbeat(&self.inner).await;
        }
    }

    /// Update the session-scoped viewed-conversation marker and re-announce
    /// identity so the server re-routes presence/read state. No-op when the
    /// id is unchanged.
    pub async fn set_current_conversation(&self, conversation_id: Option<String>) {
        {
            let mut current = self.inner.current_conversation.write().await;
            if *current == conversation_id {
                return;
            }
            *current = conversation_id;
        }
        ConnectionInner::announce_identity(&self.inner).await;
    }

    /// Compose a chat message. Local `outgoing` subscribers are notified
    /// synchronously before any network write, then the frame is written or
    /// queued. Returns the correlation id, minting one when the caller did
    /// not supply it.
    pub async fn send(&self, conversation_id: &str, outgoing: OutgoingMessage) -> Result<String> {
        let sender = self
            .inner
            .identity
            .read()
            .await
            .as_ref()
            .map(|identity| identity.role)
            .ok_or(ClientError::IdentityNotSet)?;

        let client_id = outgoing
            .client_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let message = ChatMessage {
            chat_id: conversation_id.to_string(),
            message: outgoing.text,
            sender,
            timestamp: Utc::now(),
            client_id: Some(client_id.clone()),
            message_type: outgoing.kind,
            image_data: outgoing.image_data,
            mime_type: outgoing.mime_type,
            filename: outgoing.filename,
        };

        // User intent is decoupled from network fact: subscribers render the
        // optimistic entry before the frame touches the socket.
        self.inner.dispatcher.notify_outgoing(&message);
        ConnectionInner::write_or_queue(&self.inner, Envelope::Chat(message)).await;
        Ok(client_id)
    }

    /// Fire-and-forget read receipt, queued like any frame while
    /// disconnected.
    pub async fn mark_read(&self, conversation_id: &str, sender: Role) {
        let envelope = Envelope::Read(ReadReceipt {
            chat_id: conversation_id.to_string(),
            sender,
            timestamp: Utc::now(),
        });
        ConnectionInner::write_or_queue(&self.inner, envelope).await;
    }

    /// Tear the connection down. Queued-but-unsent frames are discarded by
    /// design; a fresh `connect()` starts clean. Automatic reconnection is
    /// suppressed until the next `connect()`.
    pub async fn disconnect(&self) {
        self.inner.auto_reconnect.store(false, Ordering::SeqCst);
        ConnectionInner::stop_heartbeat(&self.inner).await;
        if let Some(task) = self.inner.recv_task.lock().await.take() {
            task.abort();
        }
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            if let Err(error) = writer.send(Message::Close(None)).await {
                debug!("close frame not delivered: {}", error);
            }
        }
        self.inner.queue.lock().await.clear();
        *self.inner.state.write().await = ConnectionState::Disconnected;
    }

    pub fn on_message(
        &self,
        callback: impl Fn(&MessageEvent) -> Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.dispatcher.on_message(callback)
    }

    pub fn on_presence(
        &self,
        callback: impl Fn(&PresenceUpdate) -> Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.dispatcher.on_presence(callback)
    }

    pub fn on_activity(
        &self,
        callback: impl Fn(&ActivityPing) -> Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.dispatcher.on_activity(callback)
    }

    pub fn on_read(
        &self,
        callback: impl Fn(&ReadReceipt) -> Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.dispatcher.on_read(callback)
    }

    pub fn on_queue_update(
        &self,
        callback: impl Fn(&QueueUpdate) -> Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.dispatcher.on_queue_update(callback)
    }

    pub fn on_notification(
        &self,
        callback: impl Fn(&NotificationsUpdate) -> Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.dispatcher.on_notification(callback)
    }

    pub fn on_outgoing(
        &self,
        callback: impl Fn(&ChatMessage) -> Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.dispatcher.on_outgoing(callback)
    }

    #[cfg(test)]
    async fn queued_frames(&self) -> Vec<Envelope> {
        self.inner.queue.lock().await.iter().cloned().collect()
    }
}

impl ConnectionInner {
    async fn open_socket(inner: &Arc<Self>) -> Result<()> {
        *inner.state.write().await = ConnectionState::Connecting;

        let connected = match timeout(
            inner.config.connect_timeout,
            connect_async(inner.url.as_str()),
        )
        .await
        {
            Ok(Ok(pair)) => pair,
            Ok(Err(error)) => {
                *inner.state.write().await = ConnectionState::Disconnected;
                return Err(ClientError::WebSocket(error.to_string()));
            }
            Err(_) => {
                *inner.state.write().await = ConnectionState::Disconnected;
                return Err(ClientError::Timeout(format!(
                    "connection timeout after {:?}",
                    inner.config.connect_timeout
                )));
            }
        };

        let (stream, _response) = connected;
        let (writer, reader) = stream.split();
        *inner.writer.lock().await = Some(writer);
        *inner.state.write().await = ConnectionState::Connected;
        inner.reconnect_attempts.store(0, Ordering::SeqCst);
        debug!("connected to {}", inner.url);

        // Identity goes out first so the server can route the buffered
        // frames; any stale queued announcement was already superseded.
        let announcement = {
            let identity = inner.identity.read().await;
            let chat_id = inner.current_conversation.read().await.clone();
            identity
                .as_ref()
                .map(|identity| Envelope::client_info(identity, chat_id))
        };
        let open_result: Result<()> = async {
            if let Some(envelope) = announcement {
                inner.remove_queued_announcement().await;
                inner.write_frame(&envelope).await?;
            }
            inner.flush_queue().await
        }
        .await;

        if let Err(error) = open_result {
            *inner.writer.lock().await = None;
            *inner.state.write().await = ConnectionState::Disconnected;
            return Err(error);
        }

        Self::start_heartbeat(inner).await;
        Self::spawn_recv_loop(inner, reader).await;
        Ok(())
    }

    async fn spawn_recv_loop(
        inner: &Arc<Self>,
        mut reader: futures_util::stream::SplitStream<WsStream>,
    ) {
        let task_inner = Arc::clone(inner);
        let task = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => match parse_frame(text.as_str()) {
                        Ok(frame) => task_inner.dispatcher.dispatch(frame),
                        Err(error) => warn!("dropping malformed frame: {}", error),
                    },
                    Ok(Message::Ping(payload)) => {
                        debug!("received ping ({} bytes)", payload.len());
                    }
                    Ok(Message::Pong(_)) => {}
                    Ok(Message::Close(_)) => break,
                    Ok(Message::Binary(_)) => {}
                    Ok(Message::Frame(_)) => {}
                    Err(error) => {
                        warn!("websocket read error: {}", error);
                        break;
                    }
                }
            }
            Self::on_socket_lost(&task_inner).await;
        });
        *inner.recv_task.lock().await = Some(task);
    }

    /// Recv loop ended without an explicit `disconnect()`.
    async fn on_socket_lost(inner: &Arc<Self>) {
        *inner.writer.lock().await = None;
        *inner.state.write().await = ConnectionState::Disconnected;
        Self::stop_heartbeat(inner).await;
        if inner.auto_reconnect.load(Ordering::SeqCst) {
            Self::schedule_reconnect(inner);
        }
    }

    /// Write failure on a nominally open socket: treat as disconnected.
    async fn mark_disconnected(inner: &Arc<Self>) {
        *inner.writer.lock().await = None;
        *inner.state.write().await = ConnectionState::Disconnected;
        Self::stop_heartbeat(inner).await;
        if let Some(task) = inner.recv_task.lock().await.take() {
            task.abort();
        }
        if inner.auto_reconnect.load(Ordering::SeqCst) {
            Self::schedule_reconnect(inner);
        }
    }

    fn schedule_reconnect(inner: &Arc<Self>) {
        if inner
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            loop {
                if !inner.auto_reconnect.load(Ordering::SeqCst) {
                    break;
                }
                let attempt = inner.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
                if attempt >= inner.config.max_reconnect_attempts {
                    warn!(
                        "reconnect attempts exhausted after {} tries; waiting for explicit connect()",
                        inner.config.max_reconnect_attempts
                    );
                    break;
                }
                let delay = reconnect_backoff(&inner.config, attempt);
                debug!("reconnect attempt {} in {:?}", attempt + 1, delay);
                tokio::time::sleep(delay).await;
                if !inner.auto_reconnect.load(Ordering::SeqCst) {
                    break;
                }

                let _guard = inner.connect_lock.lock().await;
                if *inner.state.read().await == ConnectionState::Connected {
                    break;
                }
                match Self::open_socket(&inner).await {
                    // A successful open resets the attempt counter.
                    Ok(()) => break,
                    Err(error) => warn!("reconnect attempt {} failed: {}", attempt + 1, error),
                }
            }
            inner.reconnecting.store(false, Ordering::SeqCst);
        });
    }

    async fn write_frame(&self, envelope: &Envelope) -> Result<()> {
        let text = envelope.to_json()?;
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer
            .send(Message::Text(text.into()))
            .await
            .map_err(|error| ClientError::WebSocket(error.to_string()))
    }

    async fn write_or_queue(inner: &Arc<Self>, envelope: Envelope) {
        if *inner.state.read().await == ConnectionState::Connected {
            {
                // Frames still draining from the queue keep composition
                // order; a direct write may only bypass an empty queue.
                let mut queue = inner.queue.lock().await;
                if !queue.is_empty() {
                    queue.push_back(envelope);
                    return;
                }
            }
            match inner.write_frame(&envelope).await {
                Ok(()) => return,
                Err(error) => {
                    warn!("write failed, falling back to outbound queue: {}", error);
                    inner.queue.lock().await.push_back(envelope);
                    Self::mark_disconnected(inner).await;
                    return;
                }
            }
        }
        inner.queue.lock().await.push_back(envelope);
    }

    /// Flush queued frames in FIFO order. The queue lock is held for the
    /// whole drain so a concurrent `send` cannot jump ahead of buffered
    /// frames. On a write failure the frame goes back to the front and the
    /// error propagates.
    async fn flush_queue(&self) -> Result<()> {
        let mut queue = self.queue.lock().await;
        while let Some(envelope) = queue.pop_front() {
            if let Err(error) = self.write_frame(&envelope).await {
                warn!("outbound flush interrupted: {}", error);
                queue.push_front(envelope);
                return Err(error);
            }
        }
        Ok(())
    }

    async fn announce_identity(inner: &Arc<Self>) {
        let identity = inner.identity.read().await.clone();
        let Some(identity) = identity else {
            return;
        };
        let chat_id = inner.current_conversation.read().await.clone();
        let envelope = Envelope::client_info(&identity, chat_id);

        if *inner.state.read().await == ConnectionState::Connected {
            if let Err(error) = inner.write_frame(&envelope).await {
                warn!("identity announcement failed, queueing: {}", error);
                inner.queue_announcement(envelope).await;
                Self::mark_disconnected(inner).await;
            }
        } else {
            inner.queue_announcement(envelope).await;
        }
    }

    /// The queue holds at most one unsent identity announcement; later
    /// identity info wins.
    async fn queue_announcement(&self, envelope: Envelope) {
        let mut queue = self.queue.lock().await;
        queue.retain(|frame| !matches!(frame, Envelope::ClientInfo(_)));
        queue.push_back(envelope);
    }

    async fn remove_queued_announcement(&self) {
        self.queue
            .lock()
            .await
            .retain(|frame| !matches!(frame, Envelope::ClientInfo(_)));
    }

    /// Start the liveness publisher. Suppressed for operator identities.
    async fn start_heartbeat(inner: &Arc<Self>) {
        Self::stop_heartbeat(inner).await;
        let identity = inner.identity.read().await.clone();
        let Some(identity) = identity else {
            return;
        };
        if identity.is_agent() {
            return;
        }

        let task_inner = Arc::clone(inner);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(task_inner.config.heartbeat_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let identity = task_inner.identity.read().await.clone();
                let Some(identity) = identity else {
                    break;
                };
                if identity.is_agent() {
                    break;
                }
                let envelope = Envelope::Activity(ActivityPing {
                    user_id: identity.participant_id.clone(),
                    timestamp: Utc::now(),
                });
                if let Err(error) = task_inner.write_frame(&envelope).await {
                    // The reconnect path owns recovery.
                    warn!("heartbeat write failed: {}", error);
                    break;
                }
            }
        });
        *inner.heartbeat_task.lock().await = Some(task);
    }

    async fn stop_heartbeat(inner: &Arc<Self>) {
        if let Some(task) = inner.heartbeat_task.lock().await.take() {
            task.abort();
        }
    }
}
