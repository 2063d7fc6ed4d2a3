//! Inbound frame demultiplexing.
//!
//! Routing is a discriminated switch in fixed priority order: presence →
//! activity → read receipts → queue updates → notifications → default
//! chat/other. Exactly one channel set receives a given frame; frames with
//! an unrecognized `type` land on the generic message channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::warn;

use chat_wire::{
    ActivityPing, ChatMessage, Envelope, Frame, NotificationsUpdate, PresenceUpdate, QueueUpdate,
    ReadReceipt,
};

use crate::error::Result;

/// Callback type for channel subscribers.
pub type Callback<T> = Arc<dyn Fn(&T) -> Result<()> + Send + Sync>;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(0);

/// Payload delivered on the generic message channel.
#[derive(Debug, Clone)]
pub enum MessageEvent {
    /// A chat message broadcast for some conversation.
    Chat(ChatMessage),
    /// A frame with no dedicated channel (unknown `type`, or a server-echoed
    /// `client_info`).
    Other { frame_type: String, payload: Value },
}

/// Handle for one registered subscriber. Calling [`Subscription::unsubscribe`]
/// removes the callback; dropping the handle without unsubscribing leaves the
/// subscription in place.
#[must_use]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Remove this subscriber from its channel.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

struct Channel<T> {
    name: &'static str,
    subscribers: Mutex<HashMap<u64, Callback<T>>>,
}

impl<T> Channel<T>
where
    T: Send + Sync + 'static,
{
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            subscribers: Mutex::new(HashMap::new()),
        })
    }

    fn subscribe(self: &Arc<Self>, callback: Callback<T>) -> Subscription {
        let id = NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut guard) = self.subscribers.lock() {
            guard.insert(id, callback);
        }
        let channel = Arc::clone(self);
        Subscription {
            remove: Some(Box::new(move || {
                if let Ok(mut guard) = channel.subscribers.lock() {
                    guard.remove(&id);
                }
            })),
        }
    }

    /// Run every subscriber. A failing callback is logged and must not
    /// prevent the remaining subscribers from running.
    fn notify(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = match self.subscribers.lock() {
            Ok(guard) => guard.values().cloned().collect(),
            Err(_) => return,
        };
        for callback in callbacks {
            if let Err(error) = callback(value) {
                warn!("{} subscriber failed: {}", self.name, error);
            }
        }
    }
}

/// Channel sets for inbound frames plus the local-only outgoing channel.
pub(crate) struct Dispatcher {
    message: Arc<Channel<MessageEvent>>,
    presence: Arc<Channel<PresenceUpdate>>,
    activity: Arc<Channel<ActivityPing>>,
    read: Arc<Channel<ReadReceipt>>,
    queue: Arc<Channel<QueueUpdate>>,
    notification: Arc<Channel<NotificationsUpdate>>,
    outgoing: Arc<Channel<ChatMessage>>,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self {
            message: Channel::new("message"),
            presence: Channel::new("presence"),
            activity: Channel::new("activity"),
            read: Channel::new("read"),
            queue: Channel::new("queue"),
            notification: Channel::new("notification"),
            outgoing: Channel::new("outgoing"),
        }
    }

    /// Route one parsed frame to exactly one channel set.
    pub(crate) fn dispatch(&self, frame: Frame) {
        match frame {
            Frame::Typed(Envelope::Presence(update)) => self.presence.notify(&update),
            Frame::Typed(Envelope::Activity(ping)) => self.activity.notify(&ping),
            Frame::Typed(Envelope::Read(receipt)) => self.read.notify(&receipt),
            Frame::Typed(Envelope::QueueUpdate(update)) => self.queue.notify(&update),
            Frame::Typed(Envelope::Notifications(update)) => self.notification.notify(&update),
            Frame::Typed(Envelope::Chat(message)) => {
                self.message.notify(&MessageEvent::Chat(message));
            }
            Frame::Typed(Envelope::ClientInfo(info)) => {
                self.message.notify(&MessageEvent::Other {
                    frame_type: "client_info".to_string(),
                    payload: serde_json::to_value(info).unwrap_or(Value::Null),
                });
            }
            Frame::Unknown {
                frame_type,
                payload,
            } => {
                self.message.notify(&MessageEvent::Other {
                    frame_type,
                    payload,
                });
            }
        }
    }

    /// Deliver a locally composed message to `outgoing` subscribers. Called
    /// synchronously before any network write.
    pub(crate) fn notify_outgoing(&self, message: &ChatMessage) {
        self.outgoing.notify(message);
    }

    pub(crate) fn on_message(
        &self,
        callback: impl Fn(&MessageEvent) -> Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.message.subscribe(Arc::new(callback))
    }

    pub(crate) fn on_presence(
        &self,
        callback: impl Fn(&PresenceUpdate) -> Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.presence.subscribe(Arc::new(callback))
    }

    pub(crate) fn on_activity(
        &self,
        callback: impl Fn(&ActivityPing) -> Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.activity.subscribe(Arc::new(callback))
    }

    pub(crate) fn on_read(
        &self,
        callback: impl Fn(&ReadReceipt) -> Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.read.subscribe(Arc::new(callback))
    }

    pub(crate) fn on_queue_update(
        &self,
        callback: impl Fn(&QueueUpdate) -> Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.queue.subscribe(Arc::new(callback))
    }

    pub(crate) fn on_notification(
        &self,
        callback: impl Fn(&NotificationsUpdate) -> Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.notification.subscribe(Arc::new(callback))
    }

    pub(crate) fn on_outgoing(
        &self,
        callback: impl Fn(&ChatMessage) -> Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.outgoing.subscribe(Arc::new(callback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use chat_wire::parse_frame;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> usize) {
        let count = Arc::new(AtomicUsize::new(0));
        let reader = {
            let count = Arc::clone(&count);
            move || count.load(Ordering::SeqCst)
        };
        (count, reader)
    }

    fn dispatch_text(dispatcher: &Dispatcher, text: &str) -> Result<()> {
        dispatcher.dispatch(parse_frame(text)?);
        Ok(())
    }

    #[test]
    fn each_frame_reaches_exactly_one_channel() -> Result<()> {
        let dispatcher = Dispatcher::new();
        let (message_count, messages) = counter();
        let (presence_count, presences) = counter();
        let (read_count, reads) = counter();
        let (queue_count, queues) = counter();
        let (notification_count, notifications) = counter();
        let (activity_count, activities) = counter();

        let _subs = [
            dispatcher.on_message({
                let count = Arc::clone(&message_count);
                move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
            dispatcher.on_presence({
                let count = Arc::clone(&presence_count);
                move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
            dispatcher.on_read({
                let count = Arc::clone(&read_count);
                move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
            dispatcher.on_queue_update({
                let count = Arc::clone(&queue_count);
                move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
            dispatcher.on_notification({
                let count = Arc::clone(&notification_count);
                move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
            dispatcher.on_activity({
                let count = Arc::clone(&activity_count);
                move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        ];

        dispatch_text(
            &dispatcher,
            r#"{"type":"user_presence","userId":"u1","status":"online"}"#,
        )?;
        assert_eq!(presences(), 1);
        assert_eq!(messages(), 0);

        dispatch_text(
            &dispatcher,
            r#"{"type":"message_read","chatId":"chat-1","sender":"customer","timestamp":"2024-05-04T12:30:00Z"}"#,
        )?;
        assert_eq!(reads(), 1);

        dispatch_text(&dispatcher, r#"{"type":"queue:update","waiting":2}"#)?;
        assert_eq!(queues(), 1);

        dispatch_text(
            &dispatcher,
            r#"{"type":"notifications_update","notifications":[]}"#,
        )?;
        assert_eq!(notifications(), 1);

        dispatch_text(
            &dispatcher,
            r#"{"type":"user_activity","userId":"u1","timestamp":"2024-05-04T12:30:00Z"}"#,
        )?;
        assert_eq!(activities(), 1);

        dispatch_text(
            &dispatcher,
            r#"{"type":"chat_message","chatId":"chat-1","message":"hi","sender":"customer","timestamp":"2024-05-04T12:30:00Z"}"#,
        )?;
        assert_eq!(messages(), 1);

        // Only the chat frame touched the message channel.
        assert_eq!(presences(), 1);
        assert_eq!(reads(), 1);
        assert_eq!(queues(), 1);
        assert_eq!(notifications(), 1);
        assert_eq!(activities(), 1);
        Ok(())
    }

    #[test]
    fn unknown_frames_land_on_message_channel() -> Result<()> {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = dispatcher.on_message({
            let seen = Arc::clone(&seen);
            move |event| {
                if let MessageEvent::Other { frame_type, .. } = event
                    && let Ok(mut guard) = seen.lock()
                {
                    guard.push(frame_type.clone());
                }
                Ok(())
            }
        });

        dispatch_text(&dispatcher, r#"{"type":"typing_indicator","chatId":"c"}"#)?;
        let recorded = seen
            .lock()
            .map_err(|_| ClientError::Internal("seen mutex poisoned".to_string()))?
            .clone();
        assert_eq!(recorded, vec!["typing_indicator".to_string()]);
        Ok(())
    }

    #[test]
    fn failing_subscriber_does_not_starve_others() -> Result<()> {
        let dispatcher = Dispatcher::new();
        let (count, successes) = counter();
        let _failing = dispatcher.on_message(|_| {
            Err(ClientError::Internal("subscriber exploded".to_string()))
        });
        let _counting = dispatcher.on_message({
            let count = Arc::clone(&count);
            move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        dispatch_text(
            &dispatcher,
            r#"{"type":"chat_message","chatId":"chat-1","message":"hi","sender":"customer","timestamp":"2024-05-04T12:30:00Z"}"#,
        )?;
        assert_eq!(successes(), 1);
        Ok(())
    }

    #[test]
    fn unsubscribe_stops_delivery() -> Result<()> {
        let dispatcher = Dispatcher::new();
        let (count, deliveries) = counter();
        let subscription = dispatcher.on_message({
            let count = Arc::clone(&count);
            move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let chat = r#"{"type":"chat_message","chatId":"chat-1","message":"hi","sender":"customer","timestamp":"2024-05-04T12:30:00Z"}"#;
        dispatch_text(&dispatcher, chat)?;
        assert_eq!(deliveries(), 1);

        subscription.unsubscribe();
        dispatch_text(&dispatcher, chat)?;
        assert_eq!(deliveries(), 1);
        Ok(())
    }
}
