//! Media handles owned by one room connection.

use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::negotiator::SignalingNegotiator;
use crate::error::{Error, Result};
use crate::media::{
    Consumer, DataConsumer, Device, Direction, MediaSource, Producer, RecvTransport,
    SendTransport,
};
use crate::record::Recorder;
use crate::signaling::{CreateWebRtcTransport, Signaler};

#[derive(Clone)]
struct Loaded {
    device: Arc<dyn Device>,
    can_produce: bool,
    can_consume: bool,
}

/// Device, transports and every producer, consumer and recorder of the
/// current room. Locks are only held for table access, never across a
/// signaling round trip.
#[derive(Default)]
pub(crate) struct MediaRuntime {
    loaded: Mutex<Option<Loaded>>,
    send_transport: Mutex<Option<Arc<dyn SendTransport>>>,
    recv_transport: Mutex<Option<Arc<dyn RecvTransport>>>,
    creating_send: tokio::sync::Mutex<()>,
    creating_recv: tokio::sync::Mutex<()>,
    production_started: AtomicBool,
    producers: Mutex<Vec<Box<dyn Producer>>>,
    consumers: Mutex<HashMap<String, Box<dyn Consumer>>>,
    data_consumers: Mutex<HashMap<String, Box<dyn DataConsumer>>>,
    recorders: Mutex<Vec<Box<dyn Recorder>>>,
}

impl MediaRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, device: Arc<dyn Device>, source: Option<&dyn MediaSource>, sink: bool) {
        let can_produce = source.map_or(false, |source| {
            source
                .tracks()
                .iter()
                .any(|track| device.can_produce(track.kind()))
        });
        info!(can_produce, can_consume = sink, "device loaded");
        *self.loaded.lock() = Some(Loaded {
            device,
            can_produce,
            can_consume: sink,
        });
    }

    pub fn device(&self) -> Result<Arc<dyn Device>> {
        self.loaded
            .lock()
            .as_ref()
            .map(|loaded| loaded.device.clone())
            .ok_or_else(|| Error::InvalidState("device not loaded".into()))
    }

    pub fn can_produce(&self) -> bool {
        self.loaded.lock().as_ref().map_or(false, |l| l.can_produce)
    }

    pub fn can_consume(&self) -> bool {
        self.loaded.lock().as_ref().map_or(false, |l| l.can_consume)
    }

    pub fn send_transport(&self) -> Option<Arc<dyn SendTransport>> {
        self.send_transport.lock().clone()
    }

    pub fn recv_transport(&self) -> Option<Arc<dyn RecvTransport>> {
        self.recv_transport.lock().clone()
    }

    /// Fails with [`Error::DuplicateTransport`], without touching the wire,
    /// when the send transport already exists.
    pub async fn create_send_transport(&self, signaler: &Arc<Signaler>) -> Result<()> {
        let _creating = self.creating_send.lock().await;
        if self.send_transport.lock().is_some() {
            return Err(Error::DuplicateTransport(Direction::Send));
        }
        let device = self.device()?;
        let options = signaler
            .request(&CreateWebRtcTransport {
                force_tcp: false,
                producing: true,
                consuming: false,
                sctp_capabilities: device.sctp_capabilities(),
            })
            .await?;
        let negotiator = Arc::new(SignalingNegotiator::new(signaler.clone(), &options.id));
        let transport = device.create_send_transport(options, negotiator).await?;
        debug!(transport_id = transport.id(), "send transport created");
        *self.send_transport.lock() = Some(transport);
        Ok(())
    }

    pub async fn create_recv_transport(&self, signaler: &Arc<Signaler>) -> Result<()> {
        let _creating = self.creating_recv.lock().await;
        if self.recv_transport.lock().is_some() {
            return Err(Error::DuplicateTransport(Direction::Recv));
        }
        let device = self.device()?;
        let options = signaler
            .request(&CreateWebRtcTransport {
                force_tcp: false,
                producing: false,
                consuming: true,
                sctp_capabilities: device.sctp_capabilities(),
            })
            .await?;
        let negotiator = Arc::new(SignalingNegotiator::new(signaler.clone(), &options.id));
        let transport = device.create_recv_transport(options, negotiator).await?;
        debug!(transport_id = transport.id(), "receive transport created");
        *self.recv_transport.lock() = Some(transport);
        Ok(())
    }

    /// Claims the single production run of this connection.
    pub fn begin_production(&self) -> bool {
        !self.production_started.swap(true, Ordering::SeqCst)
    }

    /// Produces every track of `source` the device can send. Failures are
    /// per track.
    pub async fn produce_all(&self, source: Arc<dyn MediaSource>) {
        let Some(transport) = self.send_transport() else {
            warn!("no send transport, nothing produced");
            return;
        };
        let device = match self.device() {
            Ok(device) => device,
            Err(e) => {
                warn!(error = %e, "cannot produce");
                return;
            }
        };

        for track in source.tracks() {
            let kind = track.kind();
            if !device.can_produce(kind) {
                debug!(track_id = track.id(), %kind, "device cannot produce track, skipping");
                continue;
            }
            match transport.produce(track.clone(), json!({})).await {
                Ok(producer) => {
                    info!(producer_id = producer.id(), %kind, "producing");
                    self.producers.lock().push(producer);
                }
                Err(e) => warn!(track_id = track.id(), %kind, error = %e, "produce failed"),
            }
        }
    }

    pub fn add_consumer(&self, consumer: Box<dyn Consumer>) {
        self.consumers
            .lock()
            .insert(consumer.id().to_string(), consumer);
    }

    pub fn add_data_consumer(&self, data_consumer: Box<dyn DataConsumer>) {
        self.data_consumers
            .lock()
            .insert(data_consumer.id().to_string(), data_consumer);
    }

    pub fn add_recorder(&self, recorder: Box<dyn Recorder>) {
        self.recorders.lock().push(recorder);
    }

    pub fn producer_count(&self) -> usize {
        self.producers.lock().len()
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.lock().len()
    }

    /// Closes consumers, data consumers and producers, then the transports,
    /// then stops the recorders.
    pub async fn close(&self) {
        let consumers: Vec<_> = self.consumers.lock().drain().map(|(_, c)| c).collect();
        let data_consumers: Vec<_> = self.data_consumers.lock().drain().map(|(_, c)| c).collect();
        let producers: Vec<_> = self.producers.lock().drain(..).collect();
        debug!(
            consumers = consumers.len(),
            data_consumers = data_consumers.len(),
            producers = producers.len(),
            "closing media"
        );

        join_all(consumers.iter().map(|c| c.close())).await;
        join_all(data_consumers.iter().map(|c| c.close())).await;
        join_all(producers.iter().map(|p| p.close())).await;

        let send = self.send_transport.lock().take();
        let recv = self.recv_transport.lock().take();
        if let Some(transport) = send {
            transport.close().await;
        }
        if let Some(transport) = recv {
            transport.close().await;
        }

        let recorders: Vec<_> = self.recorders.lock().drain(..).collect();
        join_all(recorders.iter().map(|r| r.stop())).await;

        self.loaded.lock().take();
        self.production_started.store(false, Ordering::SeqCst);
    }
}
