use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Notify;

use super::Peer;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Producer,
    Consumer,
    DataConsumer,
}

impl Binding {
    fn name(self) -> &'static str {
        match self {
            Binding::Producer => "producer",
            Binding::Consumer => "consumer",
            Binding::DataConsumer => "data consumer",
        }
    }
}

/// Remote peers by id, plus id-to-peer-id bindings. Bindings only ever
/// reference peers present in `peers`.
#[derive(Debug, Default)]
struct Tables {
    peers: HashMap<String, Peer>,
    producers: HashMap<String, String>,
    consumers: HashMap<String, String>,
    data_consumers: HashMap<String, String>,
}

impl Tables {
    fn bindings(&self, binding: Binding) -> &HashMap<String, String> {
        match binding {
            Binding::Producer => &self.producers,
            Binding::Consumer => &self.consumers,
            Binding::DataConsumer => &self.data_consumers,
        }
    }

    fn bindings_mut(&mut self, binding: Binding) -> &mut HashMap<String, String> {
        match binding {
            Binding::Producer => &mut self.producers,
            Binding::Consumer => &mut self.consumers,
            Binding::DataConsumer => &mut self.data_consumers,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Address {
    server_address: Option<String>,
    room_id: Option<String>,
}

/// Shared room graph. Every method is one atomic step; peer removal drops
/// the peer's bindings in the same step.
#[derive(Debug, Default)]
pub struct Room {
    address: RwLock<Address>,
    me: RwLock<Option<Peer>>,
    tables: RwLock<Tables>,
    peers_changed: Notify,
}

impl Room {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_address(&self, server_address: impl Into<String>, room_id: impl Into<String>) {
        *self.address.write() = Address {
            server_address: Some(server_address.into()),
            room_id: Some(room_id.into()),
        };
    }

    pub fn server_address(&self) -> Option<String> {
        self.address.read().server_address.clone()
    }

    pub fn room_id(&self) -> Option<String> {
        self.address.read().room_id.clone()
    }

    pub fn set_local_peer(&self, peer: Peer) {
        *self.me.write() = Some(peer);
    }

    pub fn local_peer(&self) -> Option<Peer> {
        self.me.read().clone()
    }

    /// Inserts (or replaces) a remote peer.
    pub fn add_peer(&self, peer: Peer) -> Peer {
        self.tables.write().peers.insert(peer.id.clone(), peer.clone());
        self.peers_changed.notify_waiters();
        peer
    }

    pub fn remove_peer(&self, peer_id: &str) -> Result<Peer> {
        let mut tables = self.tables.write();
        let peer = tables
            .peers
            .remove(peer_id)
            .ok_or_else(|| Error::GraphConsistency(format!("unknown peer {peer_id}")))?;
        tables.producers.retain(|_, owner| owner != peer_id);
        tables.consumers.retain(|_, owner| owner != peer_id);
        tables.data_consumers.retain(|_, owner| owner != peer_id);
        Ok(peer)
    }

    pub fn rename_peer(&self, peer_id: &str, display_name: &str) -> Result<Peer> {
        let mut tables = self.tables.write();
        let peer = tables
            .peers
            .get_mut(peer_id)
            .ok_or_else(|| Error::GraphConsistency(format!("unknown peer {peer_id}")))?;
        peer.display_name = display_name.to_string();
        Ok(peer.clone())
    }

    pub fn peer(&self, peer_id: &str) -> Option<Peer> {
        self.tables.read().peers.get(peer_id).cloned()
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.tables.read().peers.values().cloned().collect()
    }

    /// Waits up to `timeout` for `peer_id` to be added.
    pub async fn wait_for_peer(&self, peer_id: &str, timeout: Duration) -> Option<Peer> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.peers_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(peer) = self.peer(peer_id) {
                return Some(peer);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.peer(peer_id);
            }
        }
    }

    pub fn bind_producer(&self, producer_id: &str, peer_id: &str) -> Result<()> {
        self.bind(Binding::Producer, producer_id, peer_id)
    }

    pub fn bind_consumer(&self, consumer_id: &str, peer_id: &str) -> Result<()> {
        self.bind(Binding::Consumer, consumer_id, peer_id)
    }

    pub fn bind_data_consumer(&self, data_consumer_id: &str, peer_id: &str) -> Result<()> {
        self.bind(Binding::DataConsumer, data_consumer_id, peer_id)
    }

    pub fn unbind_consumer(&self, consumer_id: &str) -> Option<String> {
        self.tables.write().consumers.remove(consumer_id)
    }

    pub fn unbind_data_consumer(&self, data_consumer_id: &str) -> Option<String> {
        self.tables.write().data_consumers.remove(data_consumer_id)
    }

    pub fn peer_by_producer(&self, producer_id: &str) -> Option<Peer> {
        self.lookup(Binding::Producer, producer_id)
    }

    pub fn peer_by_consumer(&self, consumer_id: &str) -> Option<Peer> {
        self.lookup(Binding::Consumer, consumer_id)
    }

    pub fn peer_by_data_consumer(&self, data_consumer_id: &str) -> Option<Peer> {
        self.lookup(Binding::DataConsumer, data_consumer_id)
    }

    /// Forgets the room: address, local and remote peers, every binding.
    pub fn clear(&self) {
        *self.address.write() = Address::default();
        *self.me.write() = None;
        *self.tables.write() = Tables::default();
    }

    fn bind(&self, binding: Binding, id: &str, peer_id: &str) -> Result<()> {
        let mut tables = self.tables.write();
        if !tables.peers.contains_key(peer_id) {
            return Err(Error::GraphConsistency(format!(
                "cannot bind {} {id} to unknown peer {peer_id}",
                binding.name()
            )));
        }
        tables
            .bindings_mut(binding)
            .insert(id.to_string(), peer_id.to_string());
        Ok(())
    }

    fn lookup(&self, binding: Binding, id: &str) -> Option<Peer> {
        let tables = self.tables.read();
        let peer_id = tables.bindings(binding).get(id)?;
        tables.peers.get(peer_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::DeviceInfo;
    use std::sync::Arc;

    fn bob() -> Peer {
        Peer::new(
            "p2",
            "Bob",
            DeviceInfo {
                flag: "firefox".into(),
                name: "Firefox".into(),
                version: "120.0".into(),
            },
        )
    }

    #[test]
    fn peer_round_trip() {
        let room = Room::new();
        room.add_peer(bob());

        let found = room.peer("p2").unwrap();
        assert_eq!(found.display_name, "Bob");
        assert_eq!(found.device, bob().device);

        room.remove_peer("p2").unwrap();
        assert!(room.peer("p2").is_none());
        assert!(matches!(room.remove_peer("p2"), Err(Error::GraphConsistency(_))));
    }

    #[test]
    fn removing_a_peer_drops_its_bindings() {
        let room = Room::new();
        room.add_peer(bob());
        room.add_peer(Peer::new("p3", "Carol", DeviceInfo::default()));
        room.bind_consumer("c1", "p2").unwrap();
        room.bind_producer("pr1", "p2").unwrap();
        room.bind_data_consumer("dc1", "p2").unwrap();
        room.bind_consumer("c2", "p3").unwrap();

        room.remove_peer("p2").unwrap();

        assert!(room.peer_by_consumer("c1").is_none());
        assert!(room.peer_by_producer("pr1").is_none());
        assert!(room.peer_by_data_consumer("dc1").is_none());
        assert_eq!(room.peer_by_consumer("c2").unwrap().id, "p3");
    }

    #[test]
    fn binding_requires_a_known_peer() {
        let room = Room::new();
        let err = room.bind_consumer("c1", "ghost").unwrap_err();
        assert!(matches!(err, Error::GraphConsistency(_)));
        assert!(room.peer_by_consumer("c1").is_none());
    }

    #[test]
    fn rename_updates_lookups() {
        let room = Room::new();
        room.add_peer(bob());
        room.bind_consumer("c1", "p2").unwrap();
        room.rename_peer("p2", "Robert").unwrap();
        assert_eq!(room.peer_by_consumer("c1").unwrap().display_name, "Robert");
    }

    #[test]
    fn clear_forgets_address_and_peers() {
        let room = Room::new();
        room.set_address("host:4443", "1");
        room.add_peer(bob());
        room.clear();
        assert!(room.room_id().is_none());
        assert!(room.server_address().is_none());
        assert!(room.peers().is_empty());
    }

    #[tokio::test]
    async fn waits_for_a_late_peer() {
        let room = Arc::new(Room::new());
        let adder = {
            let room = room.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                room.add_peer(bob());
            })
        };
        let peer = room.wait_for_peer("p2", Duration::from_secs(5)).await;
        assert_eq!(peer.map(|p| p.id), Some("p2".to_string()));
        adder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_waiting_after_timeout() {
        let room = Room::new();
        assert!(room.wait_for_peer("ghost", Duration::from_millis(50)).await.is_none());
    }
}
