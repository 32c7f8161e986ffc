//! Client-side session orchestration for protoo/mediasoup rooms.
//!
//! A [`Session`] connects to a room server, loads the media engine device
//! from the router capabilities, creates transports, joins, and then keeps
//! the [`Room`] graph in sync with the server's notifications while the
//! application observes them through listener traits.

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod link;
pub mod listener;
pub mod media;
pub mod metrics;
pub mod record;
pub mod room;
pub mod session;
pub mod signaling;
mod task;

pub use config::{JoinOptions, SessionConfig};
pub use connection::{SessionMonitor, SessionState};
pub use dispatcher::Category;
pub use error::{Error, Result};
pub use listener::Listeners;
pub use media::MediaEngine;
pub use metrics::CategoryStats;
pub use room::{DeviceInfo, Peer, Room};
pub use session::{Session, SessionBuilder};
pub use signaling::Signaler;
