use thiserror::Error as ThisError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::media::Direction;
use crate::signaling::RequestId;

#[derive(Debug, ThisError)]
pub enum Error {
    /// Link establishment failed (DNS, TCP, TLS or WebSocket handshake).
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Request {id} ({method}) timed out")]
    RequestTimeout { id: RequestId, method: String },

    /// The server answered a request with `ok: false`.
    #[error("Request {method} rejected by server: {reason} (code {code})")]
    Rejected {
        method: String,
        code: i64,
        reason: String,
    },

    /// The request was still pending when the session was torn down.
    #[error("Request {id} cancelled")]
    Cancelled { id: RequestId },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Graph consistency error: {0}")]
    GraphConsistency(String),

    #[error("The {0} transport has already been created")]
    DuplicateTransport(Direction),

    #[error("Media engine error: {0}")]
    Media(#[from] anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The session is not connected to any room.
    #[error("Session closed")]
    Closed,

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Errors that only concern one inbound message and never end the session.
    pub fn is_per_message(&self) -> bool {
        matches!(
            self,
            Error::ProtocolViolation(_) | Error::GraphConsistency(_) | Error::DuplicateTransport(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
