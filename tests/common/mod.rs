//! Scripted room server over in-memory links, plus a media engine that
//! records what the session asks of it.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use room_session_client::link::{ConnectTarget, LinkConnector, MemoryConnector, MemoryServer};
use room_session_client::listener::{
    BandwidthListener, ConsumerListener, DataChannelInfo, DataConsumerListener, Listeners,
    PeerListener, ProducerListener, RequestListener,
};
use room_session_client::media::{
    ConsumeOptions, Consumer, DataConsumeOptions, DataConsumer, DataMessage, DataMessageHandler,
    Device, MediaEngine, MediaKind, MediaSource, MediaTrack, Producer, RecvTransport,
    SendTransport, TransportNegotiator, TransportOptions,
};
use room_session_client::record::{RecordSink, RecordTarget, Recorder};
use room_session_client::signaling::{Notification, Request};
use room_session_client::{Peer, Room, Session, SessionConfig};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Shared, ordered log of what happened on the client side.
#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == event)
    }

    pub fn contains(&self, event: &str) -> bool {
        self.position(event).is_some()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.0.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

/// How the fake server answers.
#[derive(Clone, Default)]
pub struct Script {
    /// `peers` of the `join` answer.
    pub peers: Vec<Value>,
    /// Request methods left unanswered.
    pub silent: HashSet<&'static str>,
}

impl Script {
    pub fn with_peers(peers: Vec<Value>) -> Self {
        Self {
            peers,
            ..Self::default()
        }
    }

    pub fn silent(mut self, method: &'static str) -> Self {
        self.silent.insert(method);
        self
    }
}

pub fn peer_json(id: &str, display_name: &str) -> Value {
    json!({
        "id": id,
        "displayName": display_name,
        "device": {"flag": "chrome", "name": "Chrome", "version": "120"}
    })
}

/// Server side of one client connection.
pub struct FakeServer {
    pub target: ConnectTarget,
    link: Arc<MemoryServer>,
    requests: Arc<Mutex<Vec<Value>>>,
    acks: tokio::sync::Mutex<mpsc::UnboundedReceiver<Value>>,
    closed: watch::Receiver<bool>,
}

impl FakeServer {
    fn start(target: ConnectTarget, link: MemoryServer, script: Script) -> Arc<Self> {
        let link = Arc::new(link);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let (acks_tx, acks_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);

        let pump = {
            let link = link.clone();
            let requests = requests.clone();
            let room_id = target.room_id.clone();
            async move {
                while let Some(frame) = link.recv().await {
                    if frame["response"] == json!(true) {
                        let _ = acks_tx.send(frame);
                        continue;
                    }
                    requests.lock().push(frame.clone());
                    let method = frame["method"].as_str().unwrap_or_default().to_string();
                    if script.silent.contains(method.as_str()) {
                        continue;
                    }
                    let data = answer(&room_id, &method, &frame["data"], &script);
                    let _ = link.send(&json!({
                        "response": true,
                        "id": frame["id"],
                        "ok": true,
                        "data": data,
                    }));
                }
                let _ = closed_tx.send(true);
            }
        };
        tokio::spawn(pump);

        Arc::new(Self {
            target,
            link,
            requests,
            acks: tokio::sync::Mutex::new(acks_rx),
            closed: closed_rx,
        })
    }

    /// Methods of the requests received so far, in order.
    pub fn methods(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|frame| frame["method"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn request_data(&self, method: &str) -> Option<Value> {
        self.requests
            .lock()
            .iter()
            .find(|frame| frame["method"] == json!(method))
            .map(|frame| frame["data"].clone())
    }

    pub fn notify(&self, method: &str, data: Value) {
        self.link
            .send(&json!({"notification": true, "method": method, "data": data}))
            .unwrap();
    }

    pub fn request(&self, id: u32, method: &str, data: Value) {
        self.link
            .send(&json!({"request": true, "id": id, "method": method, "data": data}))
            .unwrap();
    }

    pub fn send_raw(&self, frame: Value) {
        self.link.send(&frame).unwrap();
    }

    /// Next response the client sent to one of our requests.
    pub async fn next_ack(&self) -> Value {
        let mut acks = self.acks.lock().await;
        tokio::time::timeout(WAIT, acks.recv())
            .await
            .expect("no response from client")
            .expect("link closed")
    }

    pub fn close(&self) {
        self.link.close();
    }

    /// Waits until the client closed the link.
    pub async fn wait_closed(&self) {
        let mut closed = self.closed.clone();
        tokio::time::timeout(WAIT, closed.wait_for(|closed| *closed))
            .await
            .expect("client kept the link open")
            .unwrap();
    }
}

fn answer(room_id: &str, method: &str, data: &Value, script: &Script) -> Value {
    match method {
        "getRouterRtpCapabilities" => json!({"codecs": [], "headerExtensions": []}),
        "createWebRtcTransport" => {
            let direction = if data["producing"] == json!(true) { "send" } else { "recv" };
            json!({
                "id": format!("{room_id}-{direction}"),
                "iceParameters": {},
                "iceCandidates": [],
                "dtlsParameters": {"role": "auto"},
                "sctpParameters": null
            })
        }
        "connectWebRtcTransport" => json!({}),
        "produce" => {
            let kind = data["kind"].as_str().unwrap_or("?");
            json!({"id": format!("{room_id}-producer-{kind}")})
        }
        "produceData" => json!({"id": format!("{room_id}-data-producer")}),
        "join" => json!({"peers": script.peers}),
        _ => json!({}),
    }
}

/// Accepts every connection the session makes and hands out its server.
pub struct FakeRoom {
    servers: tokio::sync::Mutex<mpsc::UnboundedReceiver<Arc<FakeServer>>>,
}

impl FakeRoom {
    pub fn start(script: Script, events: Events) -> (Arc<dyn LinkConnector>, FakeRoom) {
        let (connector, mut accepted) = MemoryConnector::new();
        let (servers_tx, servers_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some((target, link)) = accepted.recv().await {
                let server = FakeServer::start(target, link, script.clone());
                if servers_tx.send(server).is_err() {
                    break;
                }
            }
        });
        let connector = Arc::new(RecordingConnector {
            inner: connector,
            events,
        });
        (
            connector,
            FakeRoom {
                servers: tokio::sync::Mutex::new(servers_rx),
            },
        )
    }

    pub async fn next_connection(&self) -> Arc<FakeServer> {
        let mut servers = self.servers.lock().await;
        tokio::time::timeout(WAIT, servers.recv())
            .await
            .expect("session did not connect")
            .expect("room stopped")
    }
}

struct RecordingConnector {
    inner: MemoryConnector,
    events: Events,
}

#[async_trait]
impl LinkConnector for RecordingConnector {
    async fn connect(
        &self,
        target: &ConnectTarget,
    ) -> room_session_client::Result<Arc<dyn room_session_client::link::Link>> {
        self.events.push(format!("connect:{}", target.room_id));
        self.inner.connect(target).await
    }
}

pub struct MockTrack {
    id: String,
    kind: MediaKind,
}

impl MediaTrack for MockTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }
}

/// One audio and one video track.
pub struct MockSource;

impl MediaSource for MockSource {
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        vec![
            Arc::new(MockTrack {
                id: "mic".into(),
                kind: MediaKind::Audio,
            }),
            Arc::new(MockTrack {
                id: "cam".into(),
                kind: MediaKind::Video,
            }),
        ]
    }
}

pub struct MockEngine {
    events: Events,
    data_handlers: Arc<Mutex<Vec<DataMessageHandler>>>,
}

impl MockEngine {
    pub fn new(events: Events) -> Self {
        Self {
            events,
            data_handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Delivers a message on every data consumer created so far.
    pub fn deliver(&self, message: DataMessage) {
        let handlers = self.data_handlers.lock().clone();
        for handler in handlers {
            handler(message.clone());
        }
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn load(&self, _router_rtp_capabilities: Value) -> anyhow::Result<Arc<dyn Device>> {
        self.events.push("load");
        Ok(Arc::new(MockDevice {
            events: self.events.clone(),
            data_handlers: self.data_handlers.clone(),
        }))
    }
}

struct MockDevice {
    events: Events,
    data_handlers: Arc<Mutex<Vec<DataMessageHandler>>>,
}

#[async_trait]
impl Device for MockDevice {
    fn rtp_capabilities(&self) -> Value {
        json!({"codecs": [{"mimeType": "audio/opus"}]})
    }

    fn sctp_capabilities(&self) -> Value {
        json!({"numStreams": {"OS": 1024, "MIS": 1024}})
    }

    fn can_produce(&self, _kind: MediaKind) -> bool {
        true
    }

    async fn create_send_transport(
        &self,
        options: TransportOptions,
        negotiator: Arc<dyn TransportNegotiator>,
    ) -> anyhow::Result<Arc<dyn SendTransport>> {
        self.events.push(format!("create-transport:{}", options.id));
        Ok(Arc::new(MockTransport {
            id: options.id,
            negotiator,
            connected: AtomicBool::new(false),
            events: self.events.clone(),
            data_handlers: self.data_handlers.clone(),
        }))
    }

    async fn create_recv_transport(
        &self,
        options: TransportOptions,
        negotiator: Arc<dyn TransportNegotiator>,
    ) -> anyhow::Result<Arc<dyn RecvTransport>> {
        self.events.push(format!("create-transport:{}", options.id));
        Ok(Arc::new(MockTransport {
            id: options.id,
            negotiator,
            connected: AtomicBool::new(false),
            events: self.events.clone(),
            data_handlers: self.data_handlers.clone(),
        }))
    }
}

/// Connects over signaling the first time it is used, like a real
/// transport does once DTLS parameters are known.
struct MockTransport {
    id: String,
    negotiator: Arc<dyn TransportNegotiator>,
    connected: AtomicBool,
    events: Events,
    data_handlers: Arc<Mutex<Vec<DataMessageHandler>>>,
}

impl MockTransport {
    async fn ensure_connected(&self) -> anyhow::Result<()> {
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.negotiator.connect(json!({"role": "client"})).await?;
            self.events.push(format!("connected:{}", self.id));
        }
        Ok(())
    }
}

#[async_trait]
impl SendTransport for MockTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn produce(
        &self,
        track: Arc<dyn MediaTrack>,
        app_data: Value,
    ) -> anyhow::Result<Box<dyn Producer>> {
        self.ensure_connected().await?;
        let id = self
            .negotiator
            .produce(track.kind(), json!({"mid": track.id()}), app_data)
            .await?;
        self.events.push(format!("produce:{id}"));
        Ok(Box::new(MockHandle {
            id,
            kind: track.kind(),
            events: self.events.clone(),
        }))
    }

    async fn close(&self) {
        self.events.push(format!("close-transport:{}", self.id));
    }
}

#[async_trait]
impl RecvTransport for MockTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn consume(&self, options: ConsumeOptions) -> anyhow::Result<Box<dyn Consumer>> {
        self.ensure_connected().await?;
        self.events.push(format!("consume:{}", options.id));
        Ok(Box::new(MockHandle {
            id: options.id,
            kind: options.kind,
            events: self.events.clone(),
        }))
    }

    async fn consume_data(
        &self,
        options: DataConsumeOptions,
        on_message: DataMessageHandler,
    ) -> anyhow::Result<Box<dyn DataConsumer>> {
        self.ensure_connected().await?;
        self.events.push(format!("consume-data:{}", options.id));
        self.data_handlers.lock().push(on_message);
        Ok(Box::new(MockHandle {
            id: options.id,
            kind: MediaKind::Audio,
            events: self.events.clone(),
        }))
    }

    async fn close(&self) {
        self.events.push(format!("close-transport:{}", self.id));
    }
}

/// Producer, consumer and data consumer handle.
struct MockHandle {
    id: String,
    kind: MediaKind,
    events: Events,
}

#[async_trait]
impl Producer for MockHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn close(&self) {
        self.events.push(format!("close:{}", self.id));
    }
}

#[async_trait]
impl Consumer for MockHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn track(&self) -> Option<Arc<dyn MediaTrack>> {
        None
    }

    async fn close(&self) {
        self.events.push(format!("close:{}", self.id));
    }
}

#[async_trait]
impl DataConsumer for MockHandle {
    fn id(&self) -> &str {
        &self.id
    }

    async fn close(&self) {
        self.events.push(format!("close:{}", self.id));
    }
}

pub struct MockSink {
    events: Events,
}

struct MockRecorder {
    path: String,
    events: Events,
}

#[async_trait]
impl Recorder for MockRecorder {
    async fn stop(&self) {
        self.events.push(format!("stop-recording:{}", self.path));
    }
}

#[async_trait]
impl RecordSink for MockSink {
    async fn start(
        &self,
        _consumer: &dyn Consumer,
        target: &RecordTarget,
    ) -> anyhow::Result<Box<dyn Recorder>> {
        let path = format!("{}/{}.{}", target.directory, target.file_stem, target.extension);
        self.events.push(format!("record:{path}"));
        Ok(Box::new(MockRecorder {
            path,
            events: self.events.clone(),
        }))
    }
}

/// What a [`Probe`] saw, in the order the listener hooks ran.
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    NewPeer(Peer),
    PeerRenamed(Peer),
    PeerClosed(Peer),
    ActiveSpeaker(Option<String>),
    DownlinkBwe,
    ProducerScore,
    ConsumerScore { consumer_id: String, peer: Peer },
    ConsumerClosed { consumer_id: String, peer: Peer },
    DataConsumerClosed(Peer),
    NewConsumer(Peer),
    NewDataConsumer(Option<Peer>),
    Message {
        peer: Option<String>,
        label: String,
        message: DataMessage,
    },
}

/// Listener for every category that reports each hook call on a channel.
pub struct Probe {
    seen: mpsc::UnboundedSender<Seen>,
}

pub struct ProbeRx(mpsc::UnboundedReceiver<Seen>);

impl Probe {
    pub fn new() -> (Arc<Probe>, ProbeRx) {
        let (seen, rx) = mpsc::unbounded_channel();
        (Arc::new(Probe { seen }), ProbeRx(rx))
    }

    pub fn listeners(self: &Arc<Self>) -> Listeners {
        Listeners {
            bandwidth: self.clone(),
            peer: self.clone(),
            producer: self.clone(),
            consumer: self.clone(),
            data_consumer: self.clone(),
            request: self.clone(),
        }
    }

    fn saw(&self, seen: Seen) {
        let _ = self.seen.send(seen);
    }
}

impl ProbeRx {
    pub async fn next(&mut self) -> Seen {
        tokio::time::timeout(WAIT, self.0.recv())
            .await
            .expect("no listener call")
            .expect("probe dropped")
    }

    /// Skips hook calls until one matches.
    pub async fn until(&mut self, mut matches: impl FnMut(&Seen) -> bool) -> Seen {
        loop {
            let seen = self.next().await;
            if matches(&seen) {
                return seen;
            }
        }
    }
}

fn consumer_id(notification: &Notification) -> String {
    notification.data["consumerId"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl BandwidthListener for Probe {
    async fn on_downlink_bwe(&self, _room: &Room, _notification: &Notification) {
        self.saw(Seen::DownlinkBwe);
    }
}

#[async_trait]
impl PeerListener for Probe {
    async fn on_new_peer(&self, _room: &Room, _notification: &Notification, peer: &Peer) {
        self.saw(Seen::NewPeer(peer.clone()));
    }

    async fn on_active_speaker(
        &self,
        _room: &Room,
        _notification: &Notification,
        speaker: Option<&Peer>,
    ) {
        self.saw(Seen::ActiveSpeaker(speaker.map(|p| p.id.clone())));
    }

    async fn on_peer_display_name_changed(
        &self,
        _room: &Room,
        _notification: &Notification,
        peer: &Peer,
    ) {
        self.saw(Seen::PeerRenamed(peer.clone()));
    }

    async fn on_peer_closed(&self, _room: &Room, _notification: &Notification, peer: &Peer) {
        self.saw(Seen::PeerClosed(peer.clone()));
    }
}

#[async_trait]
impl ProducerListener for Probe {
    async fn on_producer_score(&self, _room: &Room, _notification: &Notification) {
        self.saw(Seen::ProducerScore);
    }
}

#[async_trait]
impl ConsumerListener for Probe {
    async fn on_consumer_score(&self, room: &Room, notification: &Notification, peer: &Peer) {
        let consumer_id = consumer_id(notification);
        assert_eq!(room.peer_by_consumer(&consumer_id).as_ref(), Some(peer));
        self.saw(Seen::ConsumerScore {
            consumer_id,
            peer: peer.clone(),
        });
    }

    async fn on_consumer_closed(&self, _room: &Room, notification: &Notification, peer: &Peer) {
        self.saw(Seen::ConsumerClosed {
            consumer_id: consumer_id(notification),
            peer: peer.clone(),
        });
    }
}

#[async_trait]
impl DataConsumerListener for Probe {
    async fn on_data_consumer_closed(
        &self,
        _room: &Room,
        _notification: &Notification,
        peer: &Peer,
    ) {
        self.saw(Seen::DataConsumerClosed(peer.clone()));
    }

    fn on_message(&self, peer: Option<&Peer>, channel: &DataChannelInfo, message: &DataMessage) {
        self.saw(Seen::Message {
            peer: peer.map(|p| p.id.clone()),
            label: channel.label.clone(),
            message: message.clone(),
        });
    }
}

#[async_trait]
impl RequestListener for Probe {
    async fn on_new_consumer(&self, _room: &Room, _request: &Request, peer: &Peer) {
        self.saw(Seen::NewConsumer(peer.clone()));
    }

    async fn on_new_data_consumer(&self, _room: &Room, _request: &Request, peer: Option<&Peer>) {
        self.saw(Seen::NewDataConsumer(peer.cloned()));
    }
}

/// A session wired to a [`FakeRoom`] and a [`MockEngine`].
pub struct Harness {
    pub session: Session,
    pub room: FakeRoom,
    pub engine: Arc<MockEngine>,
    pub events: Events,
}

impl Harness {
    /// Producing and consuming (with recording) session.
    pub fn new(script: Script, listeners: Listeners) -> Self {
        Self::with_config(script, listeners, |config| config)
    }

    pub fn with_config(
        script: Script,
        listeners: Listeners,
        configure: impl FnOnce(SessionConfig) -> SessionConfig,
    ) -> Self {
        init_tracing();
        let events = Events::default();
        let engine = Arc::new(MockEngine::new(events.clone()));
        let (connector, room) = FakeRoom::start(script, events.clone());
        let config = SessionConfig::default()
            .with_media_source(Arc::new(MockSource))
            .with_record_sink(Arc::new(MockSink {
                events: events.clone(),
            }));
        let session = Session::builder(engine.clone())
            .connector(connector)
            .listeners(listeners)
            .config(configure(config))
            .build();
        Self {
            session,
            room,
            engine,
            events,
        }
    }
}

/// Polls `condition` until it holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}
