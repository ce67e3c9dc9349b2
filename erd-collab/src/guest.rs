//! Guest side of a shared document.
//!
//! ```text
//!  connect ──► guest-join-room + request-host-schema
//!                   │
//!                   ▼
//!   Joining ── host-schema ──► load snapshot ──► Live ── dispatch ──► apply
//!      ▲                                           │
//!      └────────────── link lost / reconnect ──────┘
//! ```
//!
//! Every `dispatch` a guest receives comes from the host, guest edits
//! included (the host re-emits them in the order it applied them). Frames
//! that arrive while joining are dropped: the relay keeps per-sender order,
//! so anything the host relayed before answering the request is already
//! part of the snapshot. Once loaded, further `host-schema` replies (to
//! repeated requests) are ignored.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use erd_core::{Action, SchemaState, Store};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::TransportConfig;
use crate::crypto::{self, SecretKey};
use crate::error::CollabError;
use crate::protocol::{
    DispatchPayload, Frame, HostSchema, PeerId, ReplicationBatch, RoomId, SchemaRequest,
    SequenceFilter, ShareDescriptor,
};
use crate::transport::{ConnectionState, Connector, ListenerId, RelayTransport};

#[derive(Default)]
struct Phase {
    loaded: bool,
    /// Last sequence number sent.
    seq: u64,
    inbound: SequenceFilter,
}

struct GuestInner {
    room_id: RoomId,
    key: SecretKey,
    peer: PeerId,
    store: Arc<Store>,
    phase: Mutex<Phase>,
    loaded: watch::Sender<bool>,
}

impl GuestInner {
    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request(&self) -> Frame {
        Frame::RequestHostSchema(SchemaRequest {
            room_id: self.room_id.clone(),
            peer_id: None,
        })
    }

    /// Frames sent on every (re)connect. Resets to the joining phase.
    fn rejoin(&self) -> Vec<Frame> {
        self.phase().loaded = false;
        self.loaded.send_replace(false);
        vec![Frame::GuestJoinRoom(self.room_id.clone()), self.request()]
    }

    fn on_schema(&self, schema: HostSchema) {
        if self.phase().loaded {
            log::debug!("Ignoring extra snapshot for room {}", self.room_id);
            return;
        }
        let state = crypto::decrypt_from_json(&schema.value, &self.key)
            .map_err(CollabError::from)
            .and_then(|json| Ok(serde_json::from_str::<SchemaState>(&json)?));
        match state {
            Ok(state) => {
                self.store.load(state);
                self.phase().loaded = true;
                self.loaded.send_replace(true);
                log::info!("Loaded snapshot for room {}", self.room_id);
            }
            Err(e) => log::warn!("Dropping snapshot for room {}: {e}", self.room_id),
        }
    }

    fn on_dispatch(&self, payload: DispatchPayload) {
        if !self.phase().loaded {
            log::debug!("Dropping dispatch for room {} before snapshot", self.room_id);
            return;
        }
        let batch = crypto::decrypt_from_json(&payload.value, &self.key)
            .map_err(CollabError::from)
            .and_then(|json| Ok(serde_json::from_str::<ReplicationBatch>(&json)?));
        let batch = match batch {
            Ok(batch) => batch,
            Err(e) => {
                log::warn!("Dropping dispatch for room {}: {e}", self.room_id);
                return;
            }
        };
        if batch.sender == self.peer || batch.origin.as_ref() == Some(&self.peer) {
            return;
        }
        if !self.phase().inbound.accept(&batch.sender, batch.seq) {
            return;
        }
        self.store.dispatch_all(batch.actions);
    }
}

async fn handle_frames(
    inner: Arc<GuestInner>,
    transport: Weak<RelayTransport>,
    retry: Duration,
    mut rx: mpsc::UnboundedReceiver<Frame>,
) {
    // The host may not have re-joined yet when the first request goes out,
    // in which case the relay drops it.
    let mut ticker = tokio::time::interval(retry);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            next = rx.recv() => {
                let Some(frame) = next else { break };
                if frame.room_id() != &inner.room_id {
                    log::debug!("Guest ignoring frame for room {}", frame.room_id());
                    continue;
                }
                match frame {
                    Frame::HostSchema(schema) => inner.on_schema(schema),
                    Frame::Dispatch(payload) => inner.on_dispatch(payload),
                    other => log::debug!("Guest ignoring {} frame", other.event()),
                }
            }
            _ = ticker.tick() => {
                let Some(transport) = transport.upgrade() else { break };
                if transport.is_connected() && !inner.phase().loaded {
                    log::debug!("Repeating snapshot request for room {}", inner.room_id);
                    transport.emit(inner.request());
                }
            }
        }
    }
}

/// A joined room, mirroring the host's document into a local [`Store`].
pub struct GuestSession {
    inner: Arc<GuestInner>,
    transport: Arc<RelayTransport>,
    listener: ListenerId,
    handler: JoinHandle<()>,
}

impl GuestSession {
    /// Join the room described by `share`, loading into `store`.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn join(
        connector: Arc<dyn Connector>,
        config: TransportConfig,
        share: &ShareDescriptor,
        store: Arc<Store>,
    ) -> Result<Self, CollabError> {
        let key = crypto::import_key(&share.secret_key)?;
        tokio::runtime::Handle::try_current().map_err(|_| CollabError::NoRuntime)?;

        let (loaded, _) = watch::channel(false);
        let inner = Arc::new(GuestInner {
            room_id: share.room_id.clone(),
            key,
            peer: PeerId::generate(),
            store,
            phase: Mutex::new(Phase::default()),
            loaded,
        });

        let retry = Duration::from_millis(config.snapshot_retry_ms.max(1));
        let (transport, inbound) = RelayTransport::open(connector, config);
        let transport = Arc::new(transport);
        let rejoin = inner.clone();
        let listener = transport.on_connect(Arc::new(move || rejoin.rejoin()));
        let handler = tokio::spawn(handle_frames(
            inner.clone(),
            Arc::downgrade(&transport),
            retry,
            inbound,
        ));

        log::info!("Joining room {}", share.room_id);
        Ok(Self {
            inner,
            transport,
            listener,
            handler,
        })
    }

    pub fn room_id(&self) -> &RoomId {
        &self.inner.room_id
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.inner.store
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.phase().loaded
    }

    /// Wait until a snapshot has been loaded.
    pub async fn wait_loaded(&self) -> bool {
        let mut rx = self.inner.loaded.subscribe();
        let loaded = rx.wait_for(|loaded| *loaded).await.is_ok();
        loaded
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Send this guest's own edits to the room. They are not applied
    /// locally; dispatch them to the local store as well.
    pub fn dispatch(&self, actions: &[Action]) -> Result<(), CollabError> {
        if !self.transport.is_connected() || !self.is_loaded() {
            return Err(CollabError::NotConnected);
        }
        let seq = {
            let mut phase = self.inner.phase();
            phase.seq += 1;
            phase.seq
        };
        let batch = ReplicationBatch {
            sender: self.inner.peer.clone(),
            seq,
            origin: None,
            actions: actions.to_vec(),
        };
        let value = crypto::encrypt_to_json(&serde_json::to_string(&batch)?, &self.inner.key)?;
        if self.transport.emit(Frame::Dispatch(DispatchPayload {
            room_id: self.inner.room_id.clone(),
            value,
        })) {
            Ok(())
        } else {
            Err(CollabError::NotConnected)
        }
    }

    /// Leave the room and close the link.
    pub fn leave(self) {
        self.transport
            .emit(Frame::GuestLeaveRoom(self.inner.room_id.clone()));
        log::info!("Left room {}", self.inner.room_id);
    }
}

impl Drop for GuestSession {
    fn drop(&mut self) {
        self.transport.off_connect(self.listener);
        self.transport.disconnect();
        self.handler.abort();
    }
}
