//! In-process relay.
//!
//! Implements the relay routing contract without a network so hosts and
//! guests can be wired together inside one process (tests, embedding):
//!
//! ```text
//!  host-join-room       → connection becomes the room's host (and a member)
//!  host-leave-room      → host released
//!  guest-join-room      → connection added to the room's members
//!  guest-leave-room     → connection removed
//!  request-host-schema  → forwarded to the room's host, peerId = requester
//!  host-schema          → delivered only to data.peerId
//!  dispatch (host)      → every member of the room except the host
//!  dispatch (guest)     → the room's host only
//! ```
//!
//! Guest edits reach other guests only through the host, which re-emits
//! them in its own order. Frames for rooms without a host, or addressed to
//! unknown peers, are dropped.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use super::{Connector, Link};
use crate::error::TransportError;
use crate::protocol::{Frame, PeerId, RoomId, SchemaRequest};

#[derive(Default)]
struct RelayState {
    connections: HashMap<PeerId, mpsc::UnboundedSender<Frame>>,
    hosts: HashMap<RoomId, PeerId>,
    members: HashMap<RoomId, HashSet<PeerId>>,
    /// Frames routed so far, for tests and stats.
    routed: u64,
}

impl RelayState {
    fn deliver(&mut self, peer: &PeerId, frame: Frame) {
        match self.connections.get(peer) {
            Some(tx) => {
                if tx.send(frame).is_ok() {
                    self.routed += 1;
                }
            }
            None => log::debug!("Relay: no connection for {peer}"),
        }
    }

    fn route(&mut self, from: &PeerId, frame: Frame) {
        log::trace!("Relay: {} from {from} in {}", frame.event(), frame.room_id());
        match frame {
            Frame::HostJoinRoom(room) => {
                self.members
                    .entry(room.clone())
                    .or_default()
                    .insert(from.clone());
                self.hosts.insert(room, from.clone());
            }
            Frame::HostLeaveRoom(room) => {
                if self.hosts.get(&room) == Some(from) {
                    self.hosts.remove(&room);
                }
                self.leave(&room, from);
            }
            Frame::GuestJoinRoom(room) => {
                self.members.entry(room).or_default().insert(from.clone());
            }
            Frame::GuestLeaveRoom(room) => self.leave(&room, from),
            Frame::RequestHostSchema(req) => match self.hosts.get(&req.room_id).cloned() {
                Some(host) => self.deliver(
                    &host,
                    Frame::RequestHostSchema(SchemaRequest {
                        room_id: req.room_id,
                        peer_id: Some(from.clone()),
                    }),
                ),
                None => log::debug!("Relay: no host for {}", req.room_id),
            },
            Frame::HostSchema(schema) => match schema.peer_id.clone() {
                Some(peer) => self.deliver(&peer, Frame::HostSchema(schema)),
                None => log::debug!("Relay: host-schema without addressee"),
            },
            Frame::Dispatch(payload) => {
                let Some(host) = self.hosts.get(&payload.room_id).cloned() else {
                    log::debug!("Relay: dispatch for hostless room {}", payload.room_id);
                    return;
                };
                if &host != from {
                    self.deliver(&host, Frame::Dispatch(payload));
                    return;
                }
                let targets: Vec<PeerId> = self
                    .members
                    .get(&payload.room_id)
                    .map(|m| m.iter().filter(|p| *p != from).cloned().collect())
                    .unwrap_or_default();
                for peer in targets {
                    self.deliver(&peer, Frame::Dispatch(payload.clone()));
                }
            }
        }
    }

    fn leave(&mut self, room: &RoomId, peer: &PeerId) {
        if let Some(members) = self.members.get_mut(room) {
            members.remove(peer);
            if members.is_empty() {
                self.members.remove(room);
            }
        }
    }

    fn disconnect(&mut self, peer: &PeerId) {
        self.connections.remove(peer);
        self.hosts.retain(|_, host| host != peer);
        self.members.retain(|_, members| {
            members.remove(peer);
            !members.is_empty()
        });
    }
}

/// Shared handle to an in-process relay. Clones refer to the same relay.
#[derive(Clone, Default)]
pub struct LoopbackRelay {
    state: Arc<Mutex<RelayState>>,
}

impl LoopbackRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(LoopbackConnector {
            relay: self.clone(),
        })
    }

    /// Open a link; a routing task runs until the client drops its sender.
    pub fn connect(&self) -> Link {
        let peer = PeerId::generate();
        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, mut from_client) = mpsc::unbounded_channel::<Frame>();
        self.lock().connections.insert(peer.clone(), to_client);
        log::debug!("Relay: {peer} connected");

        let relay = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = from_client.recv().await {
                let mut state = relay.lock();
                if !state.connections.contains_key(&peer) {
                    // Dropped by the relay; ignore whatever is still queued.
                    break;
                }
                state.route(&peer, frame);
            }
            relay.lock().disconnect(&peer);
            log::debug!("Relay: {peer} disconnected");
        });

        Link { outgoing, incoming }
    }

    /// Sever every connection, as if the network dropped.
    pub fn drop_connections(&self) {
        let mut state = self.lock();
        let count = state.connections.len();
        state.connections.clear();
        state.hosts.clear();
        state.members.clear();
        log::debug!("Relay: dropped {count} connection(s)");
    }

    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn host_of(&self, room: &RoomId) -> Option<PeerId> {
        self.lock().hosts.get(room).cloned()
    }

    pub fn has_room(&self, room: &RoomId) -> bool {
        self.lock().hosts.contains_key(room)
    }

    pub fn member_count(&self, room: &RoomId) -> usize {
        self.lock().members.get(room).map_or(0, HashSet::len)
    }

    pub fn routed(&self) -> u64 {
        self.lock().routed
    }
}

struct LoopbackConnector {
    relay: LoopbackRelay,
}

impl Connector for LoopbackConnector {
    fn connect(&self) -> BoxFuture<'static, Result<Link, TransportError>> {
        let link = self.relay.connect();
        Box::pin(async move { Ok(link) })
    }
}
