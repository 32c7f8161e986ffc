//! Session orchestrator: joins a room, keeps the connection running and
//! tears everything down again.

mod event_loop;
mod negotiator;
mod runtime;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Span};

use crate::config::{JoinOptions, SessionConfig};
use crate::connection::{SessionMonitor, SessionState};
use crate::dispatcher::{Category, NotificationDispatcher};
use crate::error::{Error, Result};
use crate::link::{LinkConnector, WsConnector};
use crate::listener::{
    BandwidthListener, ConsumerListener, DataConsumerListener, Listeners, PeerListener,
    ProducerListener, RequestListener,
};
use crate::media::MediaEngine;
use crate::metrics::{CategoryStats, DispatchStats};
use crate::room::Room;
use crate::signaling::{GetRouterRtpCapabilities, Join, Signaler};
use crate::task::{LogContext, TaskGroup};

use event_loop::EventLoop;
use runtime::MediaRuntime;

/// One live room connection.
struct Connection {
    epoch: u64,
    signaler: Arc<Signaler>,
    runtime: Arc<MediaRuntime>,
    /// Taken on teardown; nothing can be spawned afterwards.
    tasks: Mutex<Option<TaskGroup>>,
}

impl Connection {
    fn spawn<F>(&self, name: &'static str, task: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        let tasks = tasks.as_mut().ok_or(Error::Closed)?;
        tasks.spawn(name, task);
        Ok(())
    }
}

pub(crate) struct SessionInner {
    engine: Arc<dyn MediaEngine>,
    connector: Arc<dyn LinkConnector>,
    listeners: Listeners,
    config: SessionConfig,
    log: LogContext,
    span: Span,
    room: Arc<Room>,
    monitor: SessionMonitor,
    /// Counters of the current or most recent connection.
    stats: Mutex<Arc<DispatchStats>>,
    /// Serializes join and exit.
    lifecycle: tokio::sync::Mutex<()>,
    connection: Mutex<Option<Arc<Connection>>>,
    epochs: AtomicU64,
}

impl SessionInner {
    fn connection(&self) -> Result<Arc<Connection>> {
        self.connection.lock().clone().ok_or(Error::Closed)
    }

    async fn join(self: Arc<Self>, options: JoinOptions) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let previous = self.connection.lock().take();
        if let Some(previous) = previous {
            info!(room_id = ?self.room.room_id(), "leaving current room before joining another");
            self.teardown(previous).await;
        }

        self.monitor.set(SessionState::Connecting);
        info!(
            server = %options.server_address,
            room_id = %options.room_id,
            peer_id = %options.peer_id,
            "joining room"
        );
        self.room
            .set_address(&options.server_address, &options.room_id);
        self.room.set_local_peer(options.local_peer());

        let link = match self.connector.connect(&options.target()).await {
            Ok(link) => link,
            Err(e) => {
                warn!(error = %e, "connection failed");
                self.room.clear();
                self.monitor.set(SessionState::Idle);
                return Err(e);
            }
        };

        let signaler = Arc::new(Signaler::with_timeout(link, self.config.request_timeout));
        let runtime = Arc::new(MediaRuntime::new());
        let epoch = self.epochs.fetch_add(1, Ordering::Relaxed) + 1;
        let stats = Arc::new(DispatchStats::new());
        *self.stats.lock() = stats.clone();
        let mut tasks = TaskGroup::new(self.log.clone(), self.span.clone());
        let dispatcher =
            NotificationDispatcher::start(self.room.clone(), &self.listeners, stats, &mut tasks);
        let receive_loop = EventLoop {
            signaler: signaler.clone(),
            dispatcher,
            room: self.room.clone(),
            runtime: runtime.clone(),
            listeners: self.listeners.clone(),
            config: self.config.clone(),
            session: Arc::downgrade(&self),
            epoch,
        };
        tasks.spawn("receive-loop", receive_loop.run());

        let connection = Arc::new(Connection {
            epoch,
            signaler,
            runtime,
            tasks: Mutex::new(Some(tasks)),
        });
        *self.connection.lock() = Some(connection.clone());

        if let Err(e) = self.establish(&connection).await {
            warn!(error = %e, "join aborted");
            self.connection.lock().take();
            self.teardown(connection).await;
            return Err(e);
        }
        Ok(())
    }

    /// Capabilities, transports, `join`, then the production task.
    async fn establish(&self, connection: &Connection) -> Result<()> {
        let signaler = &connection.signaler;
        let runtime = &connection.runtime;

        let router_capabilities = signaler.request(&GetRouterRtpCapabilities {}).await?;
        let device = self.engine.load(router_capabilities).await?;
        runtime.load(
            device.clone(),
            self.config.media_source.as_deref(),
            self.config.record_sink.is_some(),
        );
        self.monitor.set(SessionState::CapabilitiesLoaded);

        let can_produce = runtime.can_produce();
        let can_consume = runtime.can_consume();
        if !can_produce && !can_consume {
            info!("nothing to produce or consume, not joining");
            return Ok(());
        }
        if can_produce {
            runtime.create_send_transport(signaler).await?;
        }
        if can_consume {
            runtime.create_recv_transport(signaler).await?;
        }
        self.monitor.set(SessionState::TransportsReady);

        let local = self
            .room
            .local_peer()
            .ok_or_else(|| Error::InvalidState("no local peer".into()))?;
        let joined = signaler
            .request(&Join {
                display_name: local.display_name,
                device: local.device,
                rtp_capabilities: device.rtp_capabilities(),
                sctp_capabilities: device.sctp_capabilities(),
            })
            .await?;
        debug!(peers = joined.peers.len(), "joined");
        for peer in joined.peers {
            self.room.add_peer(peer);
        }
        self.monitor.set(SessionState::Joined);

        if self.config.auto_produce && can_produce {
            self.start_production(connection)?;
        }
        self.monitor.set(SessionState::Active);
        info!("room active");
        Ok(())
    }

    fn start_production(&self, connection: &Connection) -> Result<()> {
        let source = self
            .config
            .media_source
            .clone()
            .ok_or_else(|| Error::InvalidState("no media source configured".into()))?;
        if !connection.runtime.can_produce() {
            return Err(Error::InvalidState("device cannot produce any track".into()));
        }
        if !connection.runtime.begin_production() {
            debug!("already producing");
            return Ok(());
        }
        let runtime = connection.runtime.clone();
        connection.spawn("production", async move { runtime.produce_all(source).await })
    }

    async fn exit_room(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let connection = self.connection.lock().take().ok_or(Error::Closed)?;
        self.teardown(connection).await;
        Ok(())
    }

    /// Exit forced by the link closing. A no-op when that connection has
    /// already been replaced or torn down.
    async fn exit_connection(self: Arc<Self>, epoch: u64) {
        let this = self.clone();
        let exit = async move {
            let _lifecycle = this.lifecycle.lock().await;
            let current = {
                let mut slot = this.connection.lock();
                let same = slot.as_ref().map_or(false, |c| c.epoch == epoch);
                if same {
                    slot.take()
                } else {
                    None
                }
            };
            if let Some(connection) = current {
                warn!("link lost, leaving room");
                this.teardown(connection).await;
            }
        };
        self.log.scope(self.span.clone(), exit).await
    }

    async fn teardown(&self, connection: Arc<Connection>) {
        self.monitor.set(SessionState::Exiting);
        connection.signaler.cancel_all();

        let tasks = connection.tasks.lock().take();
        if let Some(mut tasks) = tasks {
            tasks.shutdown().await;
        }
        connection.runtime.close().await;
        connection.signaler.close().await;

        self.room.clear();
        self.monitor.set(SessionState::Idle);
        info!("left room");
    }
}

/// Client session in one room at a time.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use room_session_client::{JoinOptions, MediaEngine, Session};
/// # async fn run(engine: Arc<dyn MediaEngine>) -> room_session_client::Result<()> {
/// let session = Session::builder(engine).build();
/// session.join(JoinOptions::new("192.168.56.1:4443", "1", "sdkClient-001")).await?;
/// session.wait_closed().await;
/// # Ok(())
/// # }
/// ```
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn builder(engine: Arc<dyn MediaEngine>) -> SessionBuilder {
        SessionBuilder::new(engine)
    }

    /// Joins `options.room_id`, leaving the current room first. Returns once
    /// the session is active; the connection keeps running in the
    /// background until [`Session::exit_room`] or the link closes.
    pub async fn join(&self, options: JoinOptions) -> Result<()> {
        let inner = self.inner.clone();
        self.inner
            .log
            .scope(self.inner.span.clone(), inner.join(options))
            .await
    }

    /// Leaves the current room. Fails with [`Error::Closed`] outside a room.
    pub async fn exit_room(&self) -> Result<()> {
        self.inner
            .log
            .scope(self.inner.span.clone(), self.inner.exit_room())
            .await
    }

    /// Leaves the current room, if any.
    pub async fn close(&self) {
        let inner = &self.inner;
        let close = async {
            if inner.exit_room().await.is_err() {
                debug!("session already closed");
            }
        };
        inner.log.scope(inner.span.clone(), close).await
    }

    /// Starts producing the configured media source. Requires transports.
    pub async fn play(&self) -> Result<()> {
        let inner = &self.inner;
        let play = async {
            let connection = inner.connection()?;
            let state = inner.monitor.state();
            if !state.has_transports() {
                return Err(Error::InvalidState(format!("cannot produce while {state}")));
            }
            inner.start_production(&connection)
        };
        inner.log.scope(inner.span.clone(), play).await
    }

    /// Creates the send transport. A second call logs and does nothing.
    pub async fn create_send_transport(&self) -> Result<()> {
        let connection = self.inner.connection()?;
        let created = connection
            .runtime
            .create_send_transport(&connection.signaler);
        self.ignore_duplicate(self.inner.log.scope(self.inner.span.clone(), created).await)
    }

    /// Creates the receive transport. A second call logs and does nothing.
    pub async fn create_recv_transport(&self) -> Result<()> {
        let connection = self.inner.connection()?;
        let created = connection
            .runtime
            .create_recv_transport(&connection.signaler);
        self.ignore_duplicate(self.inner.log.scope(self.inner.span.clone(), created).await)
    }

    fn ignore_duplicate(&self, result: Result<()>) -> Result<()> {
        match result {
            Err(e @ Error::DuplicateTransport(_)) => {
                let _guard = self.inner.span.enter();
                tracing::dispatcher::with_default(&self.inner.log.dispatch(), || {
                    warn!(error = %e, "ignoring transport request");
                });
                Ok(())
            }
            other => other,
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.monitor.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.monitor.subscribe()
    }

    /// Waits until the session is out of any room.
    pub async fn wait_closed(&self) {
        self.inner.monitor.wait_idle().await
    }

    pub fn room(&self) -> Arc<Room> {
        self.inner.room.clone()
    }

    /// Dispatcher counters of the current room, or of the last one after
    /// leaving it. Joining starts from zero.
    pub fn stats(&self, category: Category) -> CategoryStats {
        self.inner.stats.lock().snapshot(category)
    }

    pub fn all_stats(&self) -> Vec<(Category, CategoryStats)> {
        self.inner.stats.lock().all()
    }

    /// Producers created so far in the current room.
    pub fn producer_count(&self) -> usize {
        self.inner
            .connection()
            .map_or(0, |connection| connection.runtime.producer_count())
    }

    /// Consumers created so far in the current room.
    pub fn consumer_count(&self) -> usize {
        self.inner
            .connection()
            .map_or(0, |connection| connection.runtime.consumer_count())
    }
}

pub struct SessionBuilder {
    engine: Arc<dyn MediaEngine>,
    connector: Option<Arc<dyn LinkConnector>>,
    listeners: Listeners,
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self {
            engine,
            connector: None,
            listeners: Listeners::default(),
            config: SessionConfig::default(),
        }
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the WebSocket connector, e.g. with an in-memory one.
    pub fn connector(mut self, connector: Arc<dyn LinkConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn listeners(mut self, listeners: Listeners) -> Self {
        self.listeners = listeners;
        self
    }

    pub fn bandwidth_listener(mut self, listener: Arc<dyn BandwidthListener>) -> Self {
        self.listeners.bandwidth = listener;
        self
    }

    pub fn peer_listener(mut self, listener: Arc<dyn PeerListener>) -> Self {
        self.listeners.peer = listener;
        self
    }

    pub fn producer_listener(mut self, listener: Arc<dyn ProducerListener>) -> Self {
        self.listeners.producer = listener;
        self
    }

    pub fn consumer_listener(mut self, listener: Arc<dyn ConsumerListener>) -> Self {
        self.listeners.consumer = listener;
        self
    }

    pub fn data_consumer_listener(mut self, listener: Arc<dyn DataConsumerListener>) -> Self {
        self.listeners.data_consumer = listener;
        self
    }

    pub fn request_listener(mut self, listener: Arc<dyn RequestListener>) -> Self {
        self.listeners.request = listener;
        self
    }

    pub fn build(self) -> Session {
        let log = LogContext::new(self.config.log_dispatch.clone());
        let span = log.span(|| info_span!("session"));
        Session {
            inner: Arc::new(SessionInner {
                engine: self.engine,
                connector: self
                    .connector
                    .unwrap_or_else(|| Arc::new(WsConnector)),
                listeners: self.listeners,
                config: self.config,
                log,
                span,
                room: Arc::new(Room::new()),
                monitor: SessionMonitor::new(),
                stats: Mutex::new(Arc::new(DispatchStats::new())),
                lifecycle: tokio::sync::Mutex::new(()),
                connection: Mutex::new(None),
                epochs: AtomicU64::new(0),
            }),
        }
    }
}
