//! Notification dispatch: one FIFO queue and one worker per category.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::listener::Listeners;
use crate::metrics::DispatchStats;
use crate::room::{Peer, Room};
use crate::signaling::{method, Notification};
use crate::task::TaskGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Bandwidth,
    Peer,
    Producer,
    Consumer,
    DataConsumer,
}

impl Category {
    pub const COUNT: usize = 5;

    pub const ALL: [Category; Category::COUNT] = [
        Category::Bandwidth,
        Category::Peer,
        Category::Producer,
        Category::Consumer,
        Category::DataConsumer,
    ];

    /// Category a notification method is routed to.
    pub fn of(method: &str) -> Option<Category> {
        match method {
            method::DOWNLINK_BWE => Some(Category::Bandwidth),
            method::ACTIVE_SPEAKER
            | method::NEW_PEER
            | method::PEER_DISPLAY_NAME_CHANGED
            | method::PEER_CLOSED => Some(Category::Peer),
            method::PRODUCER_SCORE => Some(Category::Producer),
            method::CONSUMER_SCORE
            | method::CONSUMER_LAYERS_CHANGED
            | method::CONSUMER_PAUSED
            | method::CONSUMER_RESUMED
            | method::CONSUMER_CLOSED => Some(Category::Consumer),
            method::DATA_CONSUMER_CLOSED => Some(Category::DataConsumer),
            _ => None,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Category::Bandwidth => 0,
            Category::Peer => 1,
            Category::Producer => 2,
            Category::Consumer => 3,
            Category::DataConsumer => 4,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Bandwidth => write!(f, "bandwidth"),
            Category::Peer => write!(f, "peer"),
            Category::Producer => write!(f, "producer"),
            Category::Consumer => write!(f, "consumer"),
            Category::DataConsumer => write!(f, "dataConsumer"),
        }
    }
}

/// Sending side of the category queues. Only the receive loop enqueues.
pub struct NotificationDispatcher {
    queues: Vec<mpsc::UnboundedSender<Notification>>,
    stats: Arc<DispatchStats>,
}

impl NotificationDispatcher {
    /// Creates the queues and spawns one worker per category into `tasks`.
    pub(crate) fn start(
        room: Arc<Room>,
        listeners: &Listeners,
        stats: Arc<DispatchStats>,
        tasks: &mut TaskGroup,
    ) -> Self {
        let mut queues = Vec::with_capacity(Category::COUNT);
        for category in Category::ALL {
            let (tx, rx) = mpsc::unbounded_channel();
            queues.push(tx);
            let worker = Worker {
                category,
                room: room.clone(),
                listeners: listeners.clone(),
                stats: stats.clone(),
            };
            tasks.spawn(worker.name(), worker.run(rx));
        }
        Self { queues, stats }
    }

    /// Routes a notification to its category queue without waiting for it
    /// to be handled.
    pub fn dispatch(&self, notification: Notification) -> Result<Category> {
        let category = Category::of(&notification.method).ok_or_else(|| {
            Error::ProtocolViolation(format!("unhandled notification {}", notification.method))
        })?;
        self.queues[category.index()]
            .send(notification)
            .map_err(|_| Error::Closed)?;
        self.stats.record_enqueued(category);
        Ok(category)
    }
}

struct Worker {
    category: Category,
    room: Arc<Room>,
    listeners: Listeners,
    stats: Arc<DispatchStats>,
}

impl Worker {
    fn name(&self) -> &'static str {
        match self.category {
            Category::Bandwidth => "bandwidth-notifications",
            Category::Peer => "peer-notifications",
            Category::Producer => "producer-notifications",
            Category::Consumer => "consumer-notifications",
            Category::DataConsumer => "data-consumer-notifications",
        }
    }

    async fn run(self, mut queue: mpsc::UnboundedReceiver<Notification>) {
        while let Some(notification) = queue.recv().await {
            let result = self.handle(&notification).await;
            self.stats.record_processed(self.category, result.is_ok());
            if let Err(e) = result {
                warn!(
                    category = %self.category,
                    method = %notification.method,
                    error = %e,
                    "dropping notification"
                );
            }
        }
        debug!(category = %self.category, "notification queue closed");
    }

    async fn handle(&self, notification: &Notification) -> Result<()> {
        let room = self.room.as_ref();
        let listeners = &self.listeners;

        match notification.method.as_str() {
            method::DOWNLINK_BWE => {
                listeners.bandwidth.on_downlink_bwe(room, notification).await;
            }

            method::ACTIVE_SPEAKER => {
                // The local peer is reported as a speaker too. Unknown ids
                // are delivered as no speaker.
                let speaker = notification
                    .data
                    .get("peerId")
                    .and_then(Value::as_str)
                    .and_then(|peer_id| {
                        room.peer(peer_id)
                            .or_else(|| room.local_peer().filter(|me| me.id == peer_id))
                    });
                listeners
                    .peer
                    .on_active_speaker(room, notification, speaker.as_ref())
                    .await;
            }
            method::NEW_PEER => {
                let peer: Peer = serde_json::from_value(notification.data.clone())
                    .map_err(|e| Error::ProtocolViolation(format!("newPeer: {e}")))?;
                let peer = room.add_peer(peer);
                listeners.peer.on_new_peer(room, notification, &peer).await;
            }
            method::PEER_DISPLAY_NAME_CHANGED => {
                let peer_id = notification.str_field("peerId")?;
                let display_name = notification.str_field("displayName")?;
                let peer = room.rename_peer(peer_id, display_name)?;
                listeners
                    .peer
                    .on_peer_display_name_changed(room, notification, &peer)
                    .await;
            }
            method::PEER_CLOSED => {
                let peer = room.remove_peer(notification.str_field("peerId")?)?;
                listeners.peer.on_peer_closed(room, notification, &peer).await;
            }

            method::PRODUCER_SCORE => {
                listeners.producer.on_producer_score(room, notification).await;
            }

            method::CONSUMER_SCORE
            | method::CONSUMER_LAYERS_CHANGED
            | method::CONSUMER_PAUSED
            | method::CONSUMER_RESUMED
            | method::CONSUMER_CLOSED => {
                let consumer_id = notification.str_field("consumerId")?;
                let peer = known_peer(room.peer_by_consumer(consumer_id), "consumer", consumer_id)?;
                let consumer = &listeners.consumer;
                match notification.method.as_str() {
                    method::CONSUMER_SCORE => {
                        consumer.on_consumer_score(room, notification, &peer).await
                    }
                    method::CONSUMER_LAYERS_CHANGED => {
                        consumer
                            .on_consumer_layers_changed(room, notification, &peer)
                            .await
                    }
                    method::CONSUMER_PAUSED => {
                        consumer.on_consumer_paused(room, notification, &peer).await
                    }
                    method::CONSUMER_RESUMED => {
                        consumer.on_consumer_resumed(room, notification, &peer).await
                    }
                    _ => {
                        consumer.on_consumer_closed(room, notification, &peer).await;
                        room.unbind_consumer(consumer_id);
                    }
                }
            }

            method::DATA_CONSUMER_CLOSED => {
                let data_consumer_id = notification.str_field("dataConsumerId")?;
                let peer = known_peer(
                    room.peer_by_data_consumer(data_consumer_id),
                    "data consumer",
                    data_consumer_id,
                )?;
                listeners
                    .data_consumer
                    .on_data_consumer_closed(room, notification, &peer)
                    .await;
                room.unbind_data_consumer(data_consumer_id);
            }

            other => {
                return Err(Error::ProtocolViolation(format!(
                    "{other} is not a {} notification",
                    self.category
                )));
            }
        }
        Ok(())
    }
}

fn known_peer(peer: Option<Peer>, what: &str, id: &str) -> Result<Peer> {
    peer.ok_or_else(|| Error::GraphConsistency(format!("no peer for {what} {id}")))
}
