//! Boundary to the media engine.
//!
//! The engine owns ICE/DTLS/SRTP and codec handling. The session only moves
//! opaque capability and parameter blobs between the engine and the server,
//! and asks the engine for transports, producers and consumers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Send,
    Recv,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => write!(f, "send"),
            Direction::Recv => write!(f, "recv"),
        }
    }
}

/// Server answer to `createWebRtcTransport`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportOptions {
    pub id: String,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
    #[serde(default)]
    pub sctp_parameters: Option<Value>,
}

/// Signaling callbacks a transport invokes while negotiating.
#[async_trait]
pub trait TransportNegotiator: Send + Sync {
    /// The local DTLS parameters are ready; tell the server.
    async fn connect(&self, dtls_parameters: Value) -> anyhow::Result<()>;

    /// Announces a new producer and returns the server-side producer id.
    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: Value,
        app_data: Value,
    ) -> anyhow::Result<String>;

    /// Announces a new data producer and returns the server-side id.
    async fn produce_data(
        &self,
        sctp_stream_parameters: Value,
        label: String,
        protocol: String,
        app_data: Value,
    ) -> anyhow::Result<String>;
}

/// A local media track to send.
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
}

/// Source of the tracks the session produces (a file player, a capture
/// device, a generator).
pub trait MediaSource: Send + Sync {
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>>;
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Loads a device from the router capabilities.
    async fn load(&self, router_rtp_capabilities: Value) -> anyhow::Result<Arc<dyn Device>>;
}

#[async_trait]
pub trait Device: Send + Sync {
    fn rtp_capabilities(&self) -> Value;

    fn sctp_capabilities(&self) -> Value;

    fn can_produce(&self, kind: MediaKind) -> bool;

    async fn create_send_transport(
        &self,
        options: TransportOptions,
        negotiator: Arc<dyn TransportNegotiator>,
    ) -> anyhow::Result<Arc<dyn SendTransport>>;

    async fn create_recv_transport(
        &self,
        options: TransportOptions,
        negotiator: Arc<dyn TransportNegotiator>,
    ) -> anyhow::Result<Arc<dyn RecvTransport>>;
}

#[async_trait]
pub trait SendTransport: Send + Sync {
    fn id(&self) -> &str;

    async fn produce(
        &self,
        track: Arc<dyn MediaTrack>,
        app_data: Value,
    ) -> anyhow::Result<Box<dyn Producer>>;

    async fn close(&self);
}

/// Parameters of a `newConsumer` server request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeOptions {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    #[serde(default)]
    pub app_data: Value,
}

/// Parameters of a `newDataConsumer` server request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataConsumeOptions {
    pub id: String,
    pub data_producer_id: String,
    pub sctp_stream_parameters: Value,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub app_data: Value,
}

/// A message received on a data consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum DataMessage {
    Text(String),
    Binary(Vec<u8>),
}

pub type DataMessageHandler = Arc<dyn Fn(DataMessage) + Send + Sync>;

#[async_trait]
pub trait RecvTransport: Send + Sync {
    fn id(&self) -> &str;

    async fn consume(&self, options: ConsumeOptions) -> anyhow::Result<Box<dyn Consumer>>;

    async fn consume_data(
        &self,
        options: DataConsumeOptions,
        on_message: DataMessageHandler,
    ) -> anyhow::Result<Box<dyn DataConsumer>>;

    async fn close(&self);
}

#[async_trait]
pub trait Producer: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    async fn close(&self);
}

#[async_trait]
pub trait Consumer: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    /// The received track, handed to the record sink.
    fn track(&self) -> Option<Arc<dyn MediaTrack>>;
    async fn close(&self);
}

#[async_trait]
pub trait DataConsumer: Send + Sync {
    fn id(&self) -> &str;
    async fn close(&self);
}
