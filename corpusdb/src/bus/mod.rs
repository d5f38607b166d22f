use crate::document::Document;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// The kind of mutation a change event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Put,
    Merge,
    Delete,
}

/// Notification of a document mutation. Ephemeral: lives only in transit
/// between a store write and subscriber inboxes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub namespace: String,
    pub key: String,
    pub action: ChangeAction,
    pub timestamp: DateTime<Utc>,
    /// Document snapshot for put/merge; delete carries the key only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
}

impl ChangeEvent {
    pub fn put(namespace: &str, document: Document) -> Self {
        ChangeEvent {
            namespace: namespace.to_string(),
            key: document.key.clone(),
            action: ChangeAction::Put,
            timestamp: Utc::now(),
            document: Some(document),
        }
    }

    pub fn merge(namespace: &str, document: Document) -> Self {
        ChangeEvent {
            namespace: namespace.to_string(),
            key: document.key.clone(),
            action: ChangeAction::Merge,
            timestamp: Utc::now(),
            document: Some(document),
        }
    }

    pub fn delete(namespace: &str, key: &str) -> Self {
        ChangeEvent {
            namespace: namespace.to_string(),
            key: key.to_string(),
            action: ChangeAction::Delete,
            timestamp: Utc::now(),
            document: None,
        }
    }
}

struct SubscriberChannel {
    subscriber_id: String,
    token: u64,
    tx: SyncSender<ChangeEvent>,
}

/// Per-namespace broadcast of change events. Every subscriber gets an
/// independent copy of each event, FIFO in publish order. Inboxes are
/// bounded; a full inbox is polled until `publish_timeout`, then the event
/// is dropped for that subscriber only.
pub struct ChangeBus {
    topics: RwLock<HashMap<String, Vec<SubscriberChannel>>>,
    next_token: AtomicU64,
    capacity: usize,
    publish_timeout: Duration,
}

const POLL_INTERVAL: Duration = Duration::from_millis(5);

impl ChangeBus {
    pub fn new() -> Self {
        Self::with_capacity(1024, Duration::from_millis(100))
    }

    pub fn with_capacity(capacity: usize, publish_timeout: Duration) -> Self {
        ChangeBus {
            topics: RwLock::new(HashMap::new()),
            next_token: AtomicU64::new(0),
            capacity,
            publish_timeout,
        }
    }

    /// Register a subscriber on a namespace. Events published before this
    /// call are never delivered. A second subscription under the same id
    /// replaces the first, disconnecting it.
    pub fn subscribe(self: &Arc<Self>, namespace: &str, subscriber_id: &str) -> Subscription {
        let (tx, rx) = mpsc::sync_channel(self.capacity);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut topics) = self.topics.write() {
            let channels = topics.entry(namespace.to_string()).or_default();
            channels.retain(|c| c.subscriber_id != subscriber_id);
            channels.push(SubscriberChannel {
                subscriber_id: subscriber_id.to_string(),
                token,
                tx,
            });
        }

        Subscription {
            bus: Arc::clone(self),
            namespace: namespace.to_string(),
            subscriber_id: subscriber_id.to_string(),
            token,
            rx,
        }
    }

    /// Remove a subscriber and release its inbox.
    pub fn unsubscribe(&self, namespace: &str, subscriber_id: &str) {
        if let Ok(mut topics) = self.topics.write() {
            if let Some(channels) = topics.get_mut(namespace) {
                channels.retain(|c| c.subscriber_id != subscriber_id);
                if channels.is_empty() {
                    topics.remove(namespace);
                }
            }
        }
    }

    /// Remove one specific channel. A stale subscription replaced under the
    /// same id must not tear down its successor.
    fn remove_channel(&self, namespace: &str, token: u64) {
        if let Ok(mut topics) = self.topics.write() {
            if let Some(channels) = topics.get_mut(namespace) {
                channels.retain(|c| c.token != token);
                if channels.is_empty() {
                    topics.remove(namespace);
                }
            }
        }
    }

    /// Fan an event out to every subscriber of its namespace. Delivery is
    /// best-effort: disconnected subscribers are pruned, overflowing ones
    /// lose this event after the poll timeout.
    pub fn publish(&self, event: ChangeEvent) {
        let channels: Vec<(String, SyncSender<ChangeEvent>)> = match self.topics.read() {
            Ok(topics) => topics
                .get(&event.namespace)
                .map(|channels| {
                    channels
                        .iter()
                        .map(|c| (c.subscriber_id.clone(), c.tx.clone()))
                        .collect()
                })
                .unwrap_or_default(),
            Err(_) => return,
        };

        let mut dead: Vec<String> = Vec::new();
        for (subscriber_id, tx) in channels {
            let deadline = Instant::now() + self.publish_timeout;
            let mut pending = event.clone();
            loop {
                match tx.try_send(pending) {
                    Ok(()) => break,
                    Err(TrySendError::Full(returned)) => {
                        if Instant::now() >= deadline {
                            log::warn!(
                                "change bus: inbox full for '{subscriber_id}' on '{}', dropping {:?} event",
                                event.namespace,
                                event.action
                            );
                            break;
                        }
                        pending = returned;
                        std::thread::sleep(POLL_INTERVAL);
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        dead.push(subscriber_id.clone());
                        break;
                    }
                }
            }
        }

        if !dead.is_empty() {
            if let Ok(mut topics) = self.topics.write() {
                if let Some(channels) = topics.get_mut(&event.namespace) {
                    channels.retain(|c| !dead.contains(&c.subscriber_id));
                    if channels.is_empty() {
                        topics.remove(&event.namespace);
                    }
                }
            }
        }
    }

    /// Number of live subscribers on a namespace.
    pub fn subscriber_count(&self, namespace: &str) -> usize {
        self.topics
            .read()
            .map(|topics| topics.get(namespace).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscriber's view of one namespace topic. Dropping the subscription
/// unsubscribes and releases the inbox.
pub struct Subscription {
    bus: Arc<ChangeBus>,
    namespace: String,
    subscriber_id: String,
    token: u64,
    rx: Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    /// Non-blocking poll of the inbox.
    pub fn try_recv(&self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ChangeEvent> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Drain everything currently queued.
    pub fn drain(&self) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.remove_channel(&self.namespace, self.token);
    }
}
