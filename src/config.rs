use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::Dispatch;

use crate::link::ConnectTarget;
use crate::media::MediaSource;
use crate::record::{RecordPathGenerator, RecordSink};
use crate::room::{DeviceInfo, Peer};
use crate::signaling::DEFAULT_REQUEST_TIMEOUT;

/// How long a `newConsumer` waits for its peer's `newPeer` to be applied.
pub const DEFAULT_PEER_WAIT: Duration = Duration::from_secs(2);

/// Which room to join, and as whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinOptions {
    /// `host:port` of the room server.
    pub server_address: String,
    pub room_id: String,
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
    pub peer_id: String,
    #[serde(default = "default_display_name")]
    pub display_name: String,
    #[serde(default)]
    pub device: DeviceInfo,
}

fn default_verify_tls() -> bool {
    true
}

fn default_display_name() -> String {
    "Rust Client".to_string()
}

impl JoinOptions {
    pub fn new(
        server_address: impl Into<String>,
        room_id: impl Into<String>,
        peer_id: impl Into<String>,
    ) -> Self {
        Self {
            server_address: server_address.into(),
            room_id: room_id.into(),
            verify_tls: default_verify_tls(),
            peer_id: peer_id.into(),
            display_name: default_display_name(),
            device: DeviceInfo::default(),
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_verify_tls(mut self, verify_tls: bool) -> Self {
        self.verify_tls = verify_tls;
        self
    }

    pub fn with_device(mut self, device: DeviceInfo) -> Self {
        self.device = device;
        self
    }

    pub(crate) fn target(&self) -> ConnectTarget {
        ConnectTarget {
            server_address: self.server_address.clone(),
            room_id: self.room_id.clone(),
            peer_id: self.peer_id.clone(),
            verify_tls: self.verify_tls,
        }
    }

    pub(crate) fn local_peer(&self) -> Peer {
        Peer::new(&self.peer_id, &self.display_name, self.device.clone())
    }
}

/// Producing, consuming and recording behaviour of a session.
#[derive(Clone)]
pub struct SessionConfig {
    /// Start producing as soon as the join completes.
    pub auto_produce: bool,
    /// Tracks to produce. Without a source the session never produces.
    pub media_source: Option<Arc<dyn MediaSource>>,
    /// Accept `newConsumer` requests from the server.
    pub auto_consume: bool,
    /// Without a sink the session never consumes.
    pub record_sink: Option<Arc<dyn RecordSink>>,
    /// Defaults to [`crate::record::default_record_target`].
    pub record_path_generator: Option<RecordPathGenerator>,
    pub request_timeout: Duration,
    pub peer_wait: Duration,
    /// Where the session's tasks log. `None` uses the dispatcher current
    /// when the session spawns them.
    pub log_dispatch: Option<Dispatch>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_produce: true,
            media_source: None,
            auto_consume: true,
            record_sink: None,
            record_path_generator: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            peer_wait: DEFAULT_PEER_WAIT,
            log_dispatch: None,
        }
    }
}

impl SessionConfig {
    pub fn with_auto_produce(mut self, auto_produce: bool) -> Self {
        self.auto_produce = auto_produce;
        self
    }

    pub fn with_media_source(mut self, source: Arc<dyn MediaSource>) -> Self {
        self.media_source = Some(source);
        self
    }

    pub fn with_auto_consume(mut self, auto_consume: bool) -> Self {
        self.auto_consume = auto_consume;
        self
    }

    pub fn with_record_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.record_sink = Some(sink);
        self
    }

    pub fn with_record_path_generator(mut self, generator: RecordPathGenerator) -> Self {
        self.record_path_generator = Some(generator);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_peer_wait(mut self, wait: Duration) -> Self {
        self.peer_wait = wait;
        self
    }

    pub fn with_log_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.log_dispatch = Some(dispatch);
        self
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("auto_produce", &self.auto_produce)
            .field("media_source", &self.media_source.is_some())
            .field("auto_consume", &self.auto_consume)
            .field("record_sink", &self.record_sink.is_some())
            .field("record_path_generator", &self.record_path_generator.is_some())
            .field("request_timeout", &self.request_timeout)
            .field("peer_wait", &self.peer_wait)
            .field("log_dispatch", &self.log_dispatch.is_some())
            .finish()
    }
}
