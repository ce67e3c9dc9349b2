//! Host-side session manager.
//!
//! ```text
//!                     start_session(doc)
//!  ┌──────────────┐  ───────────────────►  Registry { sessions, rooms }
//!  │ SessionManager│                              │
//!  └──────┬───────┘                              │ on_connect: host-join-room
//!         │ dispatch(doc, actions)               ▼
//!         └──► encrypt(batch) ──► RelayTransport ──► relay ──► guests
//!                                      │
//!   request-host-schema ◄──────────────┤  repository.get → encrypt → host-schema
//!   dispatch            ◄──────────────┘  decrypt → repository.replication
//! ```
//!
//! One transport is created lazily for the first session and torn down when
//! the last session stops. Guest batches arrive only at the host, which
//! applies them and re-emits them to the room under its own sequence, so
//! the host's processing order is the room's order. Each session owns a fresh room id and key; the
//! relay only ever sees ciphertext.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use erd_core::Action;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};

use crate::config::CollabConfig;
use crate::crypto::{self, SecretKey};
use crate::error::CollabError;
use crate::persistence::SchemaRepository;
use crate::protocol::{
    DispatchPayload, DocumentId, Frame, HostSchema, PeerId, ReplicationBatch, RoomId,
    SchemaRequest, SequenceFilter, ShareDescriptor,
};
use crate::transport::ws::WsConnector;
use crate::transport::{ConnectionState, Connector, ListenerId, RelayTransport};

/// Notifications on the manager's local event surface.
#[derive(Debug, Clone)]
pub enum CollabEvent {
    SessionStarted {
        document_id: DocumentId,
        room_id: RoomId,
    },
    SessionStopped {
        document_id: DocumentId,
    },
    /// Actions from a remote peer, already handed to the repository.
    Replicated {
        document_id: DocumentId,
        actions: Vec<Action>,
    },
}

struct Session {
    room_id: RoomId,
    key: SecretKey,
    exported: String,
    listener: Option<ListenerId>,
    /// Last sequence number sent.
    seq: u64,
    inbound: SequenceFilter,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<DocumentId, Session>,
    rooms: HashMap<RoomId, DocumentId>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    repository: Arc<dyn SchemaRepository>,
    config: CollabConfig,
    peer: PeerId,
    registry: Mutex<Registry>,
    transport: Mutex<Option<RelayTransport>>,
    events: broadcast::Sender<CollabEvent>,
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transport(&self) -> MutexGuard<'_, Option<RelayTransport>> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, frame: Frame) -> bool {
        self.transport().as_ref().is_some_and(|t| t.emit(frame))
    }

    fn on_request(&self, req: SchemaRequest) {
        let found = {
            let registry = self.registry();
            registry
                .rooms
                .get(&req.room_id)
                .and_then(|doc| registry.sessions.get(doc).map(|s| (doc.clone(), s.key.clone())))
        };
        let Some((document_id, key)) = found else {
            log::warn!("Schema request for unknown room {}", req.room_id);
            return;
        };
        let Some(snapshot) = self.repository.get(&document_id) else {
            log::debug!("No snapshot for {document_id}; request ignored");
            return;
        };

        let sealed = snapshot
            .to_json()
            .map_err(|e| e.to_string())
            .and_then(|json| crypto::encrypt_to_json(&json, &key).map_err(|e| e.to_string()));
        match sealed {
            Ok(value) => {
                let sent = self.emit(Frame::HostSchema(HostSchema {
                    room_id: req.room_id,
                    peer_id: req.peer_id,
                    value,
                }));
                log::debug!("Sent snapshot of {document_id} (delivered: {sent})");
            }
            Err(e) => log::warn!("Failed to seal snapshot of {document_id}: {e}"),
        }
    }

    fn on_dispatch(&self, payload: DispatchPayload) {
        let found = {
            let registry = self.registry();
            registry
                .rooms
                .get(&payload.room_id)
                .and_then(|doc| registry.sessions.get(doc).map(|s| (doc.clone(), s.key.clone())))
        };
        let Some((document_id, key)) = found else {
            log::warn!("Dispatch for unknown room {}", payload.room_id);
            return;
        };

        let batch = match crypto::decrypt_from_json(&payload.value, &key)
            .map_err(CollabError::from)
            .and_then(|json| Ok(serde_json::from_str::<ReplicationBatch>(&json)?))
        {
            Ok(batch) => batch,
            Err(e) => {
                log::warn!("Dropping dispatch for {document_id}: {e}");
                return;
            }
        };
        if batch.sender == self.peer {
            return;
        }

        let fresh = self
            .registry()
            .sessions
            .get_mut(&document_id)
            .is_some_and(|s| s.inbound.accept(&batch.sender, batch.seq));
        if !fresh {
            log::debug!(
                "Dropping duplicate batch {} from {} for {document_id}",
                batch.seq,
                batch.sender
            );
            return;
        }

        if let Err(e) = self
            .repository
            .replication(&document_id, batch.actions.clone())
        {
            log::warn!("Replication into {document_id} failed: {e}");
            return;
        }

        // Guests only hear each other through the host, so every peer
        // applies batches in the order the host did.
        if let Err(e) = self.broadcast(&document_id, Some(batch.sender), &batch.actions) {
            log::warn!("Failed to relay batch for {document_id}: {e}");
        }
        let _ = self.events.send(CollabEvent::Replicated {
            document_id,
            actions: batch.actions,
        });
    }

    /// Seal `actions` under the next sequence number and send them to the
    /// document's room. The registry stays locked until the frame is
    /// queued so sequence numbers leave in order.
    fn broadcast(
        &self,
        document_id: &DocumentId,
        origin: Option<PeerId>,
        actions: &[Action],
    ) -> Result<bool, CollabError> {
        let mut registry = self.registry();
        let Some(session) = registry.sessions.get_mut(document_id) else {
            return Ok(false);
        };
        session.seq += 1;
        let batch = ReplicationBatch {
            sender: self.peer.clone(),
            seq: session.seq,
            origin,
            actions: actions.to_vec(),
        };
        let value = crypto::encrypt_to_json(&serde_json::to_string(&batch)?, &session.key)?;
        let room_id = session.room_id.clone();
        Ok(self.emit(Frame::Dispatch(DispatchPayload { room_id, value })))
    }
}

/// Handles inbound frames of one transport, one at a time.
async fn handle_frames(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match frame {
            Frame::RequestHostSchema(req) => inner.on_request(req),
            Frame::Dispatch(payload) => inner.on_dispatch(payload),
            other => log::debug!("Host ignoring {} frame", other.event()),
        }
    }
    log::trace!("Host frame handler finished");
}

pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        repository: Arc<dyn SchemaRepository>,
        config: CollabConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                connector,
                repository,
                config,
                peer: PeerId::generate(),
                registry: Mutex::new(Registry::default()),
                transport: Mutex::new(None),
                events,
            }),
        }
    }

    /// Manager talking to the WebSocket relay at `config.relay_url`.
    pub fn with_relay(repository: Arc<dyn SchemaRepository>, config: CollabConfig) -> Self {
        let connector = Arc::new(WsConnector::new(config.relay_url.clone()));
        Self::new(connector, repository, config)
    }

    /// This process's sender tag in replication batches.
    pub fn peer_id(&self) -> &PeerId {
        &self.inner.peer
    }

    /// Open the transport if none is running.
    fn ensure_transport(&self) -> Result<(), CollabError> {
        let mut slot = self.inner.transport();
        if slot.is_some() {
            return Ok(());
        }
        let runtime = Handle::try_current().map_err(|_| CollabError::NoRuntime)?;
        let (transport, inbound) = RelayTransport::open(
            self.inner.connector.clone(),
            self.inner.config.transport.clone(),
        );
        runtime.spawn(handle_frames(Arc::downgrade(&self.inner), inbound));
        *slot = Some(transport);
        log::debug!("Relay transport opened");
        Ok(())
    }

    /// Share `document_id` under a fresh room and key.
    ///
    /// Starting an already shared document replaces its session. The old
    /// room is abandoned without a leave frame; call
    /// [`stop_session`](Self::stop_session) first to release it.
    pub fn start_session(&self, document_id: DocumentId) -> Result<ShareDescriptor, CollabError> {
        self.ensure_transport()?;

        let key = crypto::generate_key();
        let exported = crypto::export_key(&key);
        let room_id = RoomId::generate();

        let mut registry = self.inner.registry();
        let transport = self.inner.transport();
        let transport = transport.as_ref().ok_or(CollabError::NotConnected)?;

        if let Some(old) = registry.sessions.remove(&document_id) {
            registry.rooms.remove(&old.room_id);
            if let Some(listener) = old.listener {
                transport.off_connect(listener);
            }
            log::warn!("Replacing session of {document_id}; room {} orphaned", old.room_id);
        }

        registry.rooms.insert(room_id.clone(), document_id.clone());
        registry.sessions.insert(
            document_id.clone(),
            Session {
                room_id: room_id.clone(),
                key,
                exported: exported.clone(),
                listener: None,
                seq: 0,
                inbound: SequenceFilter::new(),
            },
        );

        let join_room = room_id.clone();
        let listener = transport.on_connect(Arc::new(move || vec![Frame::HostJoinRoom(join_room.clone())]));
        if let Some(session) = registry.sessions.get_mut(&document_id) {
            session.listener = Some(listener);
        }

        log::info!("Started session for {document_id} in room {room_id}");
        let _ = self.inner.events.send(CollabEvent::SessionStarted {
            document_id,
            room_id: room_id.clone(),
        });
        Ok(ShareDescriptor {
            room_id,
            secret_key: exported,
        })
    }

    /// Stop sharing `document_id`. No-op if it is not shared.
    pub fn stop_session(&self, document_id: &DocumentId) {
        let mut registry = self.inner.registry();
        let Some(session) = registry.sessions.remove(document_id) else {
            return;
        };
        registry.rooms.remove(&session.room_id);

        let mut slot = self.inner.transport();
        if let Some(transport) = slot.as_ref() {
            if let Some(listener) = session.listener {
                transport.off_connect(listener);
            }
            transport.emit(Frame::HostLeaveRoom(session.room_id.clone()));
        }
        if registry.sessions.is_empty() {
            if let Some(transport) = slot.take() {
                transport.disconnect();
                log::debug!("Last session stopped; relay transport closed");
            }
        }

        log::info!("Stopped session for {document_id}");
        let _ = self.inner.events.send(CollabEvent::SessionStopped {
            document_id: document_id.clone(),
        });
    }

    /// Send locally produced actions to the document's room.
    ///
    /// Returns `Ok(false)` without sending when the document is not shared
    /// or the relay is not connected. Nothing is buffered.
    pub fn dispatch(&self, document_id: &DocumentId, actions: &[Action]) -> Result<bool, CollabError> {
        if actions.is_empty() || self.connection_state() != ConnectionState::Connected {
            return Ok(false);
        }

        self.inner.broadcast(document_id, None, actions)
    }

    /// Every active session's share descriptor.
    pub fn session_all(&self) -> HashMap<DocumentId, ShareDescriptor> {
        self.inner
            .registry()
            .sessions
            .iter()
            .map(|(doc, s)| {
                (
                    doc.clone(),
                    ShareDescriptor {
                        room_id: s.room_id.clone(),
                        secret_key: s.exported.clone(),
                    },
                )
            })
            .collect()
    }

    pub fn has_session(&self, document_id: &DocumentId) -> bool {
        self.inner.registry().sessions.contains_key(document_id)
    }

    /// Document shared under `room_id`, if any.
    pub fn document_for_room(&self, room_id: &RoomId) -> Option<DocumentId> {
        self.inner.registry().rooms.get(room_id).cloned()
    }

    pub fn room_count(&self) -> usize {
        self.inner.registry().rooms.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CollabEvent> {
        self.inner.events.subscribe()
    }

    pub fn has_transport(&self) -> bool {
        self.inner.transport().is_some()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner
            .transport()
            .as_ref()
            .map_or(ConnectionState::Disconnected, RelayTransport::state)
    }

    /// Wait for the relay connection. Returns `false` if no transport is open.
    pub async fn wait_connected(&self) -> bool {
        let watch = self.inner.transport().as_ref().map(RelayTransport::watch_state);
        let Some(mut rx) = watch else {
            return false;
        };
        let connected = rx.wait_for(|s| *s == ConnectionState::Connected).await.is_ok();
        connected
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(transport) = self.inner.transport().take() {
            transport.disconnect();
        }
    }
}
