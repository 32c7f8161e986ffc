//! The receive loop of a room connection.
//!
//! Frames are handled in arrival order. Responses go to the signaler,
//! notifications to the dispatcher, and server requests are served inline:
//! a `newConsumer` is created, bound and acknowledged before any later
//! notification or request is looked at. While a request is being served
//! the loop keeps reading so that responses the media engine waits for can
//! still be delivered; everything else is held back until the request is
//! done.

use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

use super::runtime::MediaRuntime;
use super::SessionInner;
use crate::config::SessionConfig;
use crate::dispatcher::NotificationDispatcher;
use crate::error::{Error, Result};
use crate::listener::{DataChannelInfo, Listeners};
use crate::media::{ConsumeOptions, Consumer, DataConsumeOptions, DataMessage};
use crate::record::{default_record_target, RecordContext};
use crate::room::{Peer, Room};
use crate::signaling::{method, InboundMessage, Request, Signaler};

const CODE_NOT_CONSUMING: i64 = 403;
const CODE_UNKNOWN_METHOD: i64 = 404;
const CODE_FAILED: i64 = 500;

pub(crate) struct EventLoop {
    pub signaler: Arc<Signaler>,
    pub dispatcher: NotificationDispatcher,
    pub room: Arc<Room>,
    pub runtime: Arc<MediaRuntime>,
    pub listeners: Listeners,
    pub config: SessionConfig,
    pub session: Weak<SessionInner>,
    pub epoch: u64,
}

impl EventLoop {
    pub async fn run(self) {
        let mut backlog = VecDeque::new();
        loop {
            let message = match backlog.pop_front() {
                Some(message) => message,
                None => match self.signaler.receive_next().await {
                    Some(raw) => match InboundMessage::parse(&raw) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!(error = %e, "dropping frame");
                            continue;
                        }
                    },
                    None => break,
                },
            };

            match message {
                InboundMessage::Response(response) => self.signaler.resolve(response),
                InboundMessage::Notification(notification) => {
                    if let Err(e) = self.dispatcher.dispatch(notification) {
                        warn!(error = %e, "notification not dispatched");
                    }
                }
                InboundMessage::Request(request) => {
                    if !self.serve(request, &mut backlog).await {
                        break;
                    }
                }
            }
        }

        info!("link closed");
        self.signaler.cancel_all();
        if let Some(session) = self.session.upgrade() {
            tokio::spawn(session.exit_connection(self.epoch));
        }
    }

    /// Handles one server request to completion. Returns `false` when the
    /// link closed meanwhile.
    async fn serve(&self, request: Request, backlog: &mut VecDeque<InboundMessage>) -> bool {
        let mut link_open = true;
        let result = {
            let work = self.handle_request(&request);
            tokio::pin!(work);
            loop {
                tokio::select! {
                    biased;
                    result = &mut work => break result,
                    raw = self.signaler.receive_next(), if link_open => match raw {
                        Some(raw) => match InboundMessage::parse(&raw) {
                            Ok(InboundMessage::Response(response)) => {
                                self.signaler.resolve(response)
                            }
                            Ok(message) => backlog.push_back(message),
                            Err(e) => warn!(error = %e, "dropping frame"),
                        },
                        None => {
                            link_open = false;
                            self.signaler.cancel_all();
                        }
                    },
                }
            }
        };

        if let Err(e) = result {
            if e.is_per_message() {
                warn!(
                    request_id = request.id,
                    method = %request.method,
                    error = %e,
                    "request failed"
                );
            } else {
                error!(
                    request_id = request.id,
                    method = %request.method,
                    error = %e,
                    "request failed"
                );
            }
            let code = if is_known_request(&request.method) {
                CODE_FAILED
            } else {
                CODE_UNKNOWN_METHOD
            };
            if link_open {
                if let Err(e) = self.signaler.reject(request.id, code, &e.to_string()) {
                    warn!(request_id = request.id, error = %e, "could not reject request");
                }
            }
        }
        link_open
    }

    async fn handle_request(&self, request: &Request) -> Result<()> {
        match request.method.as_str() {
            method::NEW_CONSUMER => self.on_new_consumer(request).await,
            method::NEW_DATA_CONSUMER => self.on_new_data_consumer(request).await,
            other => Err(Error::ProtocolViolation(format!(
                "unknown server request {other}"
            ))),
        }
    }

    fn consuming(&self) -> bool {
        self.config.auto_consume && self.runtime.can_consume()
    }

    fn reject_not_consuming(&self, request: &Request) -> Result<()> {
        debug!(request_id = request.id, method = %request.method, "not consuming, rejecting");
        self.signaler
            .reject(request.id, CODE_NOT_CONSUMING, "not consuming")
    }

    /// Resolves the producing peer, giving a pending `newPeer` on the peer
    /// worker a bounded chance to land first.
    async fn producing_peer(&self, peer_id: &str) -> Result<Peer> {
        if let Some(peer) = self.room.peer(peer_id) {
            return Ok(peer);
        }
        self.room
            .wait_for_peer(peer_id, self.config.peer_wait)
            .await
            .ok_or_else(|| Error::GraphConsistency(format!("unknown peer {peer_id}")))
    }

    async fn on_new_consumer(&self, request: &Request) -> Result<()> {
        if !self.consuming() {
            return self.reject_not_consuming(request);
        }

        let peer_id = request.str_field("peerId")?;
        let options: ConsumeOptions = serde_json::from_value(request.data.clone())
            .map_err(|e| Error::ProtocolViolation(format!("newConsumer: {e}")))?;
        let peer = self.producing_peer(peer_id).await?;
        let transport = self
            .runtime
            .recv_transport()
            .ok_or_else(|| Error::InvalidState("no receive transport".into()))?;

        let consumer = transport.consume(options.clone()).await?;
        let bound = self
            .room
            .bind_consumer(consumer.id(), peer_id)
            .and_then(|()| self.room.bind_producer(&options.producer_id, peer_id));
        if let Err(e) = bound {
            consumer.close().await;
            return Err(e);
        }
        self.signaler.reply(request.id, json!({}))?;
        debug!(consumer_id = consumer.id(), peer_id, kind = %options.kind, "consuming");

        self.record(&peer, &options, consumer.as_ref()).await;
        self.runtime.add_consumer(consumer);
        self.listeners
            .request
            .on_new_consumer(&self.room, request, &peer)
            .await;
        Ok(())
    }

    async fn record(&self, peer: &Peer, options: &ConsumeOptions, consumer: &dyn Consumer) {
        let Some(sink) = self.config.record_sink.as_ref() else {
            return;
        };
        let room_id = self.room.room_id().unwrap_or_default();
        let local_peer = self.room.local_peer();
        let context = RecordContext {
            room_id: &room_id,
            local_peer: local_peer.as_ref(),
            producer_peer: peer,
            consumer_id: consumer.id(),
            producer_id: &options.producer_id,
            kind: options.kind,
        };
        let target = match &self.config.record_path_generator {
            Some(generate) => generate(&context),
            None => default_record_target(&context),
        };
        match sink.start(consumer, &target).await {
            Ok(recorder) => {
                debug!(
                    consumer_id = consumer.id(),
                    path = %target.relative_path().display(),
                    "recording"
                );
                self.runtime.add_recorder(recorder);
            }
            Err(e) => warn!(consumer_id = consumer.id(), error = %e, "recording failed"),
        }
    }

    async fn on_new_data_consumer(&self, request: &Request) -> Result<()> {
        if !self.consuming() {
            return self.reject_not_consuming(request);
        }

        // null for data produced by the server itself
        let peer_id = request.data.get("peerId").and_then(Value::as_str);
        let options: DataConsumeOptions = serde_json::from_value(request.data.clone())
            .map_err(|e| Error::ProtocolViolation(format!("newDataConsumer: {e}")))?;
        let peer = match peer_id {
            Some(peer_id) => Some(self.producing_peer(peer_id).await?),
            None => None,
        };
        let transport = self
            .runtime
            .recv_transport()
            .ok_or_else(|| Error::InvalidState("no receive transport".into()))?;

        let channel = DataChannelInfo {
            data_consumer_id: options.id.clone(),
            label: options.label.clone(),
            protocol: options.protocol.clone(),
            app_data: options.app_data.clone(),
        };
        let on_message = {
            let room = self.room.clone();
            let listener = self.listeners.data_consumer.clone();
            let peer_id = peer_id.map(str::to_string);
            Arc::new(move |message: DataMessage| {
                let peer = peer_id.as_deref().and_then(|id| room.peer(id));
                listener.on_message(peer.as_ref(), &channel, &message);
            })
        };

        let data_consumer = transport.consume_data(options, on_message).await?;
        if let Some(peer_id) = peer_id {
            if let Err(e) = self.room.bind_data_consumer(data_consumer.id(), peer_id) {
                data_consumer.close().await;
                return Err(e);
            }
        }
        self.signaler.reply(request.id, json!({}))?;
        debug!(data_consumer_id = data_consumer.id(), peer_id, "consuming data");

        self.runtime.add_data_consumer(data_consumer);
        self.listeners
            .request
            .on_new_data_consumer(&self.room, request, peer.as_ref())
            .await;
        Ok(())
    }
}

fn is_known_request(name: &str) -> bool {
    name == method::NEW_CONSUMER || name == method::NEW_DATA_CONSUMER
}
