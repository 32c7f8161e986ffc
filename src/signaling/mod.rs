//! Request/response correlation on top of a [`Link`].

mod message;

use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::link::Link;

pub use message::{
    method, ConnectWebRtcTransport, CreateWebRtcTransport, GetRouterRtpCapabilities,
    InboundMessage, Join, Joined, Notification, Produce, ProduceData, Produced, Request,
    RequestId, Response, SignalRequest,
};
use message::{OutgoingRequest, OutgoingResponse};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Request ids are drawn from `0..=MAX_REQUEST_ID`, like the protoo server does.
const MAX_REQUEST_ID: RequestId = 10_000_000;

type Slot = oneshot::Receiver<Result<Response>>;

/// One request waiting for its response.
///
/// `resolver` is consumed when the response arrives (or on cancellation);
/// `slot` is consumed by the single caller awaiting the response. The entry
/// is dropped once both halves are gone, or on timeout.
struct PendingRequest {
    method: String,
    resolver: Option<oneshot::Sender<Result<Response>>>,
    slot: Option<Slot>,
}

pub struct Signaler {
    link: Arc<dyn Link>,
    pending: parking_lot::Mutex<Pending>,
    timeout: Duration,
}

#[derive(Default)]
struct Pending {
    requests: HashMap<RequestId, PendingRequest>,
    /// Set by [`Signaler::cancel_all`]; no request is accepted afterwards.
    closed: bool,
}

impl Signaler {
    pub fn new(link: Arc<dyn Link>) -> Self {
        Self::with_timeout(link, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(link: Arc<dyn Link>, timeout: Duration) -> Self {
        Self {
            link,
            pending: parking_lot::Mutex::new(Pending::default()),
            timeout,
        }
    }

    /// Registers a pending request and queues it on the link. Does not wait
    /// for the answer; see [`Signaler::await_response`].
    pub fn send_request(&self, method: &str, data: Value) -> Result<RequestId> {
        let (resolver, slot) = oneshot::channel();
        let id = {
            let mut pending = self.pending.lock();
            if pending.closed {
                return Err(Error::Closed);
            }
            let mut rng = rand::thread_rng();
            let id = loop {
                let candidate = rng.gen_range(0..=MAX_REQUEST_ID);
                if !pending.requests.contains_key(&candidate) {
                    break candidate;
                }
            };
            pending.requests.insert(
                id,
                PendingRequest {
                    method: method.to_string(),
                    resolver: Some(resolver),
                    slot: Some(slot),
                },
            );
            id
        };

        let frame = OutgoingRequest {
            request: true,
            method,
            data: &data,
            id,
        };
        let sent = serde_json::to_string(&frame)
            .map_err(Error::from)
            .and_then(|text| self.link.send(text));
        if let Err(e) = sent {
            self.pending.lock().requests.remove(&id);
            return Err(e);
        }

        debug!(request_id = id, method, "request sent");
        Ok(id)
    }

    pub async fn await_response(&self, id: RequestId) -> Result<Response> {
        self.await_response_timeout(id, self.timeout).await
    }

    pub async fn await_response_timeout(
        &self,
        id: RequestId,
        timeout: Duration,
    ) -> Result<Response> {
        let (slot, method) = {
            let mut pending = self.pending.lock();
            let entry = pending
                .requests
                .get_mut(&id)
                .ok_or_else(|| Error::InvalidState(format!("no pending request {id}")))?;
            let slot = entry
                .slot
                .take()
                .ok_or_else(|| Error::InvalidState(format!("request {id} is already awaited")))?;
            let method = entry.method.clone();
            if entry.resolver.is_none() {
                pending.requests.remove(&id);
            }
            (slot, method)
        };

        match tokio::time::timeout(timeout, slot).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Cancelled { id }),
            Err(_) => {
                self.pending.lock().requests.remove(&id);
                warn!(request_id = id, %method, "request timed out");
                Err(Error::RequestTimeout { id, method })
            }
        }
    }

    /// Sends a typed request and waits for its decoded answer.
    pub async fn request<R: SignalRequest>(&self, request: &R) -> Result<R::Response> {
        let data = serde_json::to_value(request)?;
        let id = self.send_request(R::METHOD, data)?;
        let data = self.await_response(id).await?.into_data(R::METHOD)?;
        serde_json::from_value(data)
            .map_err(|e| Error::ProtocolViolation(format!("{} response: {e}", R::METHOD)))
    }

    /// Fulfills the pending request matching `response.id`. Responses for
    /// unknown, expired or already answered ids are logged and dropped.
    pub fn resolve(&self, response: Response) {
        let id = response.id;
        let mut pending = self.pending.lock();
        let Some(entry) = pending.requests.get_mut(&id) else {
            warn!(request_id = id, "response for unknown or expired request, ignoring");
            return;
        };
        let Some(resolver) = entry.resolver.take() else {
            warn!(request_id = id, "duplicate response, ignoring");
            return;
        };
        debug!(request_id = id, method = %entry.method, ok = response.ok, "response received");
        let _ = resolver.send(Ok(response));
        if entry.slot.is_none() {
            pending.requests.remove(&id);
        }
    }

    /// Next raw frame from the link; `None` once the link is closed.
    pub async fn receive_next(&self) -> Option<String> {
        self.link.recv().await
    }

    /// Acknowledges a server-initiated request.
    pub fn reply(&self, id: RequestId, data: Value) -> Result<()> {
        let frame = serde_json::to_string(&OutgoingResponse::accept(id, data))?;
        self.link.send(frame)
    }

    /// Answers a server-initiated request with an error.
    pub fn reject(&self, id: RequestId, code: i64, reason: &str) -> Result<()> {
        let frame = serde_json::to_string(&OutgoingResponse::reject(id, code, reason))?;
        self.link.send(frame)
    }

    /// Resolves every pending request with [`Error::Cancelled`] and refuses
    /// new ones with [`Error::Closed`].
    pub fn cancel_all(&self) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.closed = true;
            pending.requests.drain().collect()
        };
        for (id, mut entry) in drained {
            if let Some(resolver) = entry.resolver.take() {
                let _ = resolver.send(Err(Error::Cancelled { id }));
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().requests.len()
    }

    pub async fn close(&self) {
        self.cancel_all();
        self.link.close().await;
    }
}
