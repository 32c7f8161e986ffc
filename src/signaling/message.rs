//! Protoo wire messages.
//!
//! Every frame on the link is a JSON object tagged by one of the boolean
//! flags `request`, `response` or `notification`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

pub type RequestId = u32;

/// Method names used on the wire.
pub mod method {
    pub const GET_ROUTER_RTP_CAPABILITIES: &str = "getRouterRtpCapabilities";
    pub const CREATE_WEBRTC_TRANSPORT: &str = "createWebRtcTransport";
    pub const CONNECT_WEBRTC_TRANSPORT: &str = "connectWebRtcTransport";
    pub const PRODUCE: &str = "produce";
    pub const PRODUCE_DATA: &str = "produceData";
    pub const JOIN: &str = "join";

    pub const NEW_CONSUMER: &str = "newConsumer";
    pub const NEW_DATA_CONSUMER: &str = "newDataConsumer";

    pub const DOWNLINK_BWE: &str = "downlinkBwe";
    pub const ACTIVE_SPEAKER: &str = "activeSpeaker";
    pub const NEW_PEER: &str = "newPeer";
    pub const PEER_DISPLAY_NAME_CHANGED: &str = "peerDisplayNameChanged";
    pub const PEER_CLOSED: &str = "peerClosed";
    pub const PRODUCER_SCORE: &str = "producerScore";
    pub const CONSUMER_SCORE: &str = "consumerScore";
    pub const CONSUMER_LAYERS_CHANGED: &str = "consumerLayersChanged";
    pub const CONSUMER_PAUSED: &str = "consumerPaused";
    pub const CONSUMER_RESUMED: &str = "consumerResumed";
    pub const CONSUMER_CLOSED: &str = "consumerClosed";
    pub const DATA_CONSUMER_CLOSED: &str = "dataConsumerClosed";
}

#[derive(Debug, Serialize)]
pub(crate) struct OutgoingRequest<'a> {
    pub request: bool,
    pub method: &'a str,
    pub data: &'a Value,
    pub id: RequestId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OutgoingResponse {
    pub response: bool,
    pub id: RequestId,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl OutgoingResponse {
    pub fn accept(id: RequestId, data: Value) -> Self {
        Self {
            response: true,
            id,
            ok: true,
            data: Some(data),
            error_code: None,
            error_reason: None,
        }
    }

    pub fn reject(id: RequestId, code: i64, reason: impl Into<String>) -> Self {
        Self {
            response: true,
            id,
            ok: false,
            data: None,
            error_code: Some(code),
            error_reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    request: bool,
    #[serde(default)]
    response: bool,
    #[serde(default)]
    notification: bool,
    id: Option<RequestId>,
    method: Option<String>,
    ok: Option<bool>,
    #[serde(default)]
    data: Value,
    error_code: Option<i64>,
    error_reason: Option<String>,
}

/// Answer to a request this client sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: RequestId,
    pub ok: bool,
    pub data: Value,
    pub error_code: Option<i64>,
    pub error_reason: Option<String>,
}

impl Response {
    /// Turns an `ok: false` answer into [`Error::Rejected`].
    pub fn into_data(self, method: &str) -> Result<Value> {
        if self.ok {
            Ok(self.data)
        } else {
            Err(Error::Rejected {
                method: method.to_string(),
                code: self.error_code.unwrap_or_default(),
                reason: self.error_reason.unwrap_or_default(),
            })
        }
    }
}

/// Server-initiated request, answered with a response carrying the same id.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub data: Value,
}

impl Request {
    pub fn str_field(&self, key: &str) -> Result<&str> {
        str_field(&self.method, &self.data, key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub data: Value,
}

impl Notification {
    pub fn new(method: impl Into<String>, data: Value) -> Self {
        Self {
            method: method.into(),
            data,
        }
    }

    pub fn str_field(&self, key: &str) -> Result<&str> {
        str_field(&self.method, &self.data, key)
    }
}

fn str_field<'a>(method: &str, data: &'a Value, key: &str) -> Result<&'a str> {
    data.get(key).and_then(Value::as_str).ok_or_else(|| {
        Error::ProtocolViolation(format!("{method}: missing string field `{key}`"))
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Response(Response),
    Request(Request),
    Notification(Notification),
}

impl InboundMessage {
    pub fn parse(raw: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(raw)
            .map_err(|e| Error::ProtocolViolation(format!("malformed frame: {e}")))?;

        if envelope.response {
            let id = envelope
                .id
                .ok_or_else(|| Error::ProtocolViolation("response without id".into()))?;
            return Ok(InboundMessage::Response(Response {
                id,
                ok: envelope.ok.unwrap_or(false),
                data: envelope.data,
                error_code: envelope.error_code,
                error_reason: envelope.error_reason,
            }));
        }

        if envelope.request {
            let (Some(id), Some(method)) = (envelope.id, envelope.method) else {
                return Err(Error::ProtocolViolation(
                    "request without id or method".into(),
                ));
            };
            return Ok(InboundMessage::Request(Request {
                id,
                method,
                data: envelope.data,
            }));
        }

        if envelope.notification {
            let method = envelope
                .method
                .ok_or_else(|| Error::ProtocolViolation("notification without method".into()))?;
            return Ok(InboundMessage::Notification(Notification {
                method,
                data: envelope.data,
            }));
        }

        Err(Error::ProtocolViolation(
            "frame is neither request, response nor notification".into(),
        ))
    }
}

/// A typed client request: its wire method, payload and expected answer.
pub trait SignalRequest: Serialize {
    const METHOD: &'static str;
    type Response: DeserializeOwned;
}

#[derive(Debug, Serialize)]
pub struct GetRouterRtpCapabilities {}

impl SignalRequest for GetRouterRtpCapabilities {
    const METHOD: &'static str = method::GET_ROUTER_RTP_CAPABILITIES;
    type Response = Value;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWebRtcTransport {
    pub force_tcp: bool,
    pub producing: bool,
    pub consuming: bool,
    pub sctp_capabilities: Value,
}

impl SignalRequest for CreateWebRtcTransport {
    const METHOD: &'static str = method::CREATE_WEBRTC_TRANSPORT;
    type Response = crate::media::TransportOptions;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectWebRtcTransport {
    pub transport_id: String,
    pub dtls_parameters: Value,
}

impl SignalRequest for ConnectWebRtcTransport {
    const METHOD: &'static str = method::CONNECT_WEBRTC_TRANSPORT;
    type Response = serde::de::IgnoredAny;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Produce {
    pub transport_id: String,
    pub kind: crate::media::MediaKind,
    pub rtp_parameters: Value,
    pub app_data: Value,
}

impl SignalRequest for Produce {
    const METHOD: &'static str = method::PRODUCE;
    type Response = Produced;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceData {
    pub transport_id: String,
    pub label: String,
    pub protocol: String,
    pub sctp_stream_parameters: Value,
    pub app_data: Value,
}

impl SignalRequest for ProduceData {
    const METHOD: &'static str = method::PRODUCE_DATA;
    type Response = Produced;
}

/// Server-assigned id of a new producer or data producer.
#[derive(Debug, Clone, Deserialize)]
pub struct Produced {
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Join {
    pub display_name: String,
    pub device: crate::room::DeviceInfo,
    pub rtp_capabilities: Value,
    pub sctp_capabilities: Value,
}

impl SignalRequest for Join {
    const METHOD: &'static str = method::JOIN;
    type Response = Joined;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Joined {
    #[serde(default)]
    pub peers: Vec<crate::room::Peer>,
}
