//! In-process link, used for loopback setups and tests.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use super::{ConnectTarget, Link, LinkConnector};
use crate::error::{Error, Result};

/// Client half of an in-memory link.
pub struct MemoryLink {
    outgoing: parking_lot::Mutex<Option<mpsc::UnboundedSender<String>>>,
    incoming: Mutex<mpsc::UnboundedReceiver<String>>,
}

/// Server half of an in-memory link.
pub struct MemoryServer {
    outgoing: parking_lot::Mutex<Option<mpsc::UnboundedSender<String>>>,
    incoming: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl MemoryLink {
    pub fn pair() -> (MemoryLink, MemoryServer) {
        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        (
            MemoryLink {
                outgoing: parking_lot::Mutex::new(Some(to_server)),
                incoming: Mutex::new(from_server),
            },
            MemoryServer {
                outgoing: parking_lot::Mutex::new(Some(to_client)),
                incoming: Mutex::new(from_client),
            },
        )
    }
}

#[async_trait]
impl Link for MemoryLink {
    fn send(&self, message: String) -> Result<()> {
        let outgoing = self.outgoing.lock();
        let tx = outgoing.as_ref().ok_or(Error::Closed)?;
        tx.send(message).map_err(|_| Error::Closed)
    }

    async fn recv(&self) -> Option<String> {
        self.incoming.lock().await.recv().await
    }

    async fn close(&self) {
        self.outgoing.lock().take();
    }
}

impl MemoryServer {
    pub fn send(&self, message: &Value) -> Result<()> {
        let outgoing = self.outgoing.lock();
        let tx = outgoing.as_ref().ok_or(Error::Closed)?;
        tx.send(message.to_string()).map_err(|_| Error::Closed)
    }

    /// Next frame from the client, or `None` once the client closed its side.
    pub async fn recv(&self) -> Option<Value> {
        let raw = self.incoming.lock().await.recv().await?;
        serde_json::from_str(&raw).ok()
    }

    /// Closes the server side; the client observes end-of-stream.
    pub fn close(&self) {
        self.outgoing.lock().take();
    }
}

/// Hands out fresh in-memory links and passes the server half to the test
/// (or embedding application) through a channel.
pub struct MemoryConnector {
    servers: mpsc::UnboundedSender<(ConnectTarget, MemoryServer)>,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(ConnectTarget, MemoryServer)>) {
        let (servers, rx) = mpsc::unbounded_channel();
        (Self { servers }, rx)
    }
}

#[async_trait]
impl LinkConnector for MemoryConnector {
    async fn connect(&self, target: &ConnectTarget) -> Result<Arc<dyn Link>> {
        let (link, server) = MemoryLink::pair();
        self.servers
            .send((target.clone(), server))
            .map_err(|_| Error::Connection(format!("no server listening for {}", target.url())))?;
        Ok(Arc::new(link))
    }
}
