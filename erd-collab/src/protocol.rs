//! Relay wire protocol.
//!
//! Frames are JSON text messages:
//!
//! ```text
//! {"event": "host-join-room",      "data": "<roomId>"}
//! {"event": "host-leave-room",     "data": "<roomId>"}
//! {"event": "guest-join-room",     "data": "<roomId>"}
//! {"event": "guest-leave-room",    "data": "<roomId>"}
//! {"event": "request-host-schema", "data": {"roomId", "peerId"?}}
//! {"event": "host-schema",         "data": {"roomId", "peerId"?, "value": Envelope}}
//! {"event": "dispatch",            "data": {"roomId", "value": Envelope}}
//! ```
//!
//! The relay sees room ids and peer ids only. Snapshots and action batches
//! are sealed in an [`Envelope`] before they leave the process.

use std::collections::HashMap;
use std::fmt;

use erd_core::Action;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::Envelope;
use crate::error::ProtocolError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifies a document known to the persistence collaborator.
    DocumentId
);
string_id!(
    /// Relay room a session is shared under.
    RoomId
);
string_id!(
    /// Connection identity assigned by the relay, or a process's own tag.
    PeerId
);

const ROOM_ALPHABET: &[u8] = b"useandom-26T198340PX75pxJACKVERYMINDBUSHWOLF_GQZbfghjklqvwyzrict";
const ROOM_ID_LEN: usize = 21;

impl RoomId {
    /// Fresh URL-safe random room id.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let id = (0..ROOM_ID_LEN)
            .map(|_| ROOM_ALPHABET[rng.gen_range(0..ROOM_ALPHABET.len())] as char)
            .collect();
        Self(id)
    }
}

impl PeerId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaRequest {
    pub room_id: RoomId,
    /// Stamped by the relay with the requesting connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<PeerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSchema {
    pub room_id: RoomId,
    /// Addressee; the relay delivers only to this peer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<PeerId>,
    pub value: Envelope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchPayload {
    pub room_id: RoomId,
    pub value: Envelope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum Frame {
    HostJoinRoom(RoomId),
    HostLeaveRoom(RoomId),
    GuestJoinRoom(RoomId),
    GuestLeaveRoom(RoomId),
    RequestHostSchema(SchemaRequest),
    HostSchema(HostSchema),
    Dispatch(DispatchPayload),
}

impl Frame {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn room_id(&self) -> &RoomId {
        match self {
            Frame::HostJoinRoom(room)
            | Frame::HostLeaveRoom(room)
            | Frame::GuestJoinRoom(room)
            | Frame::GuestLeaveRoom(room) => room,
            Frame::RequestHostSchema(req) => &req.room_id,
            Frame::HostSchema(schema) => &schema.room_id,
            Frame::Dispatch(payload) => &payload.room_id,
        }
    }

    /// Event name, for logging.
    pub fn event(&self) -> &'static str {
        match self {
            Frame::HostJoinRoom(_) => "host-join-room",
            Frame::HostLeaveRoom(_) => "host-leave-room",
            Frame::GuestJoinRoom(_) => "guest-join-room",
            Frame::GuestLeaveRoom(_) => "guest-leave-room",
            Frame::RequestHostSchema(_) => "request-host-schema",
            Frame::HostSchema(_) => "host-schema",
            Frame::Dispatch(_) => "dispatch",
        }
    }
}

/// Plaintext of a `dispatch` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationBatch {
    /// Process tag of the producer.
    pub sender: PeerId,
    /// Monotonic per sender and room, starting at 1.
    pub seq: u64,
    /// Author of the actions when the host relays a guest's batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<PeerId>,
    pub actions: Vec<Action>,
}

/// Drops batches already seen from the same sender.
///
/// After a reconnect the relay may deliver a batch twice; anything at or
/// below the last accepted sequence number is a duplicate.
#[derive(Debug, Default)]
pub struct SequenceFilter {
    last_seen: HashMap<PeerId, u64>,
}

impl SequenceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `seq` from `sender`. Returns `false` for a duplicate.
    pub fn accept(&mut self, sender: &PeerId, seq: u64) -> bool {
        match self.last_seen.get_mut(sender) {
            Some(last) if seq <= *last => false,
            Some(last) => {
                *last = seq;
                true
            }
            None => {
                self.last_seen.insert(sender.clone(), seq);
                true
            }
        }
    }
}

/// What a host hands out to invite guests: the room to join and the
/// exported key. The key never goes to the relay.
#[derive(Clone, PartialEq, Eq)]
pub struct ShareDescriptor {
    pub room_id: RoomId,
    pub secret_key: String,
}

impl fmt::Debug for ShareDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareDescriptor")
            .field("room_id", &self.room_id)
            .field("secret_key", &"..")
            .finish()
    }
}
