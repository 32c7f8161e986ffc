//! Application hooks, one trait per notification category plus the
//! server-request hooks. Every method defaults to doing nothing.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::media::DataMessage;
use crate::room::{Peer, Room};
use crate::signaling::{Notification, Request};

#[async_trait]
pub trait BandwidthListener: Send + Sync {
    /// High frequency.
    async fn on_downlink_bwe(&self, _room: &Room, _notification: &Notification) {}
}

#[async_trait]
pub trait PeerListener: Send + Sync {
    async fn on_new_peer(&self, _room: &Room, _notification: &Notification, _peer: &Peer) {}

    /// High frequency. `speaker` is `None` when nobody is speaking.
    async fn on_active_speaker(
        &self,
        _room: &Room,
        _notification: &Notification,
        _speaker: Option<&Peer>,
    ) {
    }

    async fn on_peer_display_name_changed(
        &self,
        _room: &Room,
        _notification: &Notification,
        _peer: &Peer,
    ) {
    }

    async fn on_peer_closed(&self, _room: &Room, _notification: &Notification, _peer: &Peer) {}
}

#[async_trait]
pub trait ProducerListener: Send + Sync {
    /// High frequency.
    async fn on_producer_score(&self, _room: &Room, _notification: &Notification) {}
}

#[async_trait]
pub trait ConsumerListener: Send + Sync {
    /// High frequency.
    async fn on_consumer_score(&self, _room: &Room, _notification: &Notification, _peer: &Peer) {}

    async fn on_consumer_layers_changed(
        &self,
        _room: &Room,
        _notification: &Notification,
        _peer: &Peer,
    ) {
    }

    async fn on_consumer_paused(&self, _room: &Room, _notification: &Notification, _peer: &Peer) {
    }

    async fn on_consumer_resumed(&self, _room: &Room, _notification: &Notification, _peer: &Peer) {
    }

    async fn on_consumer_closed(&self, _room: &Room, _notification: &Notification, _peer: &Peer) {
    }
}

/// Label, protocol and app data of the data consumer a message arrived on.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChannelInfo {
    pub data_consumer_id: String,
    pub label: String,
    pub protocol: String,
    pub app_data: Value,
}

#[async_trait]
pub trait DataConsumerListener: Send + Sync {
    async fn on_data_consumer_closed(
        &self,
        _room: &Room,
        _notification: &Notification,
        _peer: &Peer,
    ) {
    }

    /// Called from the media engine's delivery context; must not block.
    fn on_message(
        &self,
        _peer: Option<&Peer>,
        _channel: &DataChannelInfo,
        _message: &DataMessage,
    ) {
    }
}

/// Hooks for server requests, called after the consumer is bound into the
/// room and the request has been acknowledged.
#[async_trait]
pub trait RequestListener: Send + Sync {
    async fn on_new_consumer(&self, _room: &Room, _request: &Request, _peer: &Peer) {}

    async fn on_new_data_consumer(&self, _room: &Room, _request: &Request, _peer: Option<&Peer>) {}
}

/// No-op implementation of every listener trait.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl BandwidthListener for NoopListener {}
impl PeerListener for NoopListener {}
impl ProducerListener for NoopListener {}
impl ConsumerListener for NoopListener {}
impl DataConsumerListener for NoopListener {}
impl RequestListener for NoopListener {}

/// The set of hooks injected into a session.
#[derive(Clone)]
pub struct Listeners {
    pub bandwidth: Arc<dyn BandwidthListener>,
    pub peer: Arc<dyn PeerListener>,
    pub producer: Arc<dyn ProducerListener>,
    pub consumer: Arc<dyn ConsumerListener>,
    pub data_consumer: Arc<dyn DataConsumerListener>,
    pub request: Arc<dyn RequestListener>,
}

impl Default for Listeners {
    fn default() -> Self {
        let noop = Arc::new(NoopListener);
        Self {
            bandwidth: noop.clone(),
            peer: noop.clone(),
            producer: noop.clone(),
            consumer: noop.clone(),
            data_consumer: noop.clone(),
            request: noop,
        }
    }
}
