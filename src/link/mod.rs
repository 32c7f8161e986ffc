//! Message-oriented connection between the client and the room server.

mod memory;
mod tls;
mod ws;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;

pub use memory::{MemoryConnector, MemoryLink, MemoryServer};
pub use ws::{WsConnector, WsLink};

/// An ordered, bidirectional stream of text frames.
///
/// `send` only queues the frame; it never waits for the peer. `recv`
/// returns `None` once the link is closed, from either side.
#[async_trait]
pub trait Link: Send + Sync {
    fn send(&self, message: String) -> Result<()>;

    async fn recv(&self) -> Option<String>;

    async fn close(&self);
}

/// Where to connect: the server, the room and the identity to join as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub server_address: String,
    pub room_id: String,
    pub peer_id: String,
    pub verify_tls: bool,
}

impl ConnectTarget {
    pub fn url(&self) -> String {
        format!(
            "wss://{}/?roomId={}&peerId={}",
            self.server_address, self.room_id, self.peer_id
        )
    }
}

#[async_trait]
pub trait LinkConnector: Send + Sync {
    async fn connect(&self, target: &ConnectTarget) -> Result<Arc<dyn Link>>;
}
