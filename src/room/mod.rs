//! Room graph: peers and the producer/consumer ids bound to them.

mod state;

use serde::{Deserialize, Serialize};

pub use state::Room;

/// Device descriptor a peer announces when joining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub flag: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            flag: "rust".to_string(),
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// A room participant. The same shape is used on the wire (`newPeer`,
/// `join` answer) and in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub device: DeviceInfo,
}

impl Peer {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, device: DeviceInfo) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            device,
        }
    }
}
