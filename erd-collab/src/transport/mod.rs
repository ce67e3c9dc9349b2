//! Relay transport: a duplex frame channel that reconnects on its own.
//!
//! ```text
//!            emit(frame)                          inbound frames
//!  caller ──────────────► [link slot] ──► Link ──► relay ──► ... ──► mpsc rx
//!                              ▲
//!              driver task ────┘  connect → pump → lost → backoff → connect
//! ```
//!
//! The concrete link comes from a [`Connector`]: WebSocket ([`ws`]) or the
//! in-process [`loopback`] relay. Emitting while disconnected drops the
//! frame; this is a best-effort live channel with no buffering. On every
//! (re)connect, the frames returned by connect listeners are sent before any
//! other frame, which is how sessions re-join their rooms.

pub mod loopback;
pub mod ws;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::protocol::Frame;

/// An established duplex link to the relay.
pub struct Link {
    pub outgoing: mpsc::UnboundedSender<Frame>,
    pub incoming: mpsc::UnboundedReceiver<Frame>,
}

/// Opens links to a relay.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'static, Result<Link, TransportError>>;
}

/// Transport connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Produces the frames to send right after each (re)connect.
pub type ConnectListener = Arc<dyn Fn() -> Vec<Frame> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct LinkSlot {
    outgoing: Option<mpsc::UnboundedSender<Frame>>,
    listeners: Vec<(ListenerId, ConnectListener)>,
}

struct Shared {
    slot: Mutex<LinkSlot>,
    state: watch::Sender<ConnectionState>,
    next_listener: AtomicU64,
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, LinkSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

pub struct RelayTransport {
    shared: Arc<Shared>,
    token: CancellationToken,
}

impl RelayTransport {
    /// Start connecting in the background.
    ///
    /// Returns the transport and the stream of inbound frames. Must be
    /// called inside a Tokio runtime.
    pub fn open(
        connector: Arc<dyn Connector>,
        config: TransportConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            slot: Mutex::new(LinkSlot::default()),
            state,
            next_listener: AtomicU64::new(1),
        });
        let token = CancellationToken::new();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(drive(
            connector,
            config,
            shared.clone(),
            inbound_tx,
            token.clone(),
        ));

        (Self { shared, token }, inbound_rx)
    }

    /// Send a frame if connected. Returns `false` when it was dropped.
    pub fn emit(&self, frame: Frame) -> bool {
        let slot = self.shared.slot();
        match &slot.outgoing {
            Some(tx) => {
                let event = frame.event();
                if tx.send(frame).is_ok() {
                    true
                } else {
                    log::debug!("Dropping {event}: link closing");
                    false
                }
            }
            None => {
                log::debug!("Dropping {}: not connected", frame.event());
                false
            }
        }
    }

    /// Register a listener run on every (re)connect. If already connected
    /// it runs immediately. Listeners must not call back into the transport.
    pub fn on_connect(&self, listener: ConnectListener) -> ListenerId {
        let id = ListenerId(self.shared.next_listener.fetch_add(1, Ordering::Relaxed));
        let mut slot = self.shared.slot();
        if let Some(tx) = &slot.outgoing {
            for frame in listener() {
                let _ = tx.send(frame);
            }
        }
        slot.listeners.push((id, listener));
        id
    }

    pub fn off_connect(&self, id: ListenerId) {
        self.shared.slot().listeners.retain(|(l, _)| *l != id);
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch handle for state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Wait until the transport reaches `state`.
    pub async fn wait_for(&self, state: ConnectionState) -> bool {
        let mut rx = self.watch_state();
        let reached = rx.wait_for(|s| *s == state).await.is_ok();
        reached
    }

    /// Close the link and stop reconnecting. Idempotent.
    pub fn disconnect(&self) {
        if self.token.is_cancelled() {
            return;
        }
        self.token.cancel();
        self.shared.slot().outgoing = None;
        log::debug!("Relay transport closed");
    }
}

impl Drop for RelayTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn drive(
    connector: Arc<dyn Connector>,
    config: TransportConfig,
    shared: Arc<Shared>,
    inbound: mpsc::UnboundedSender<Frame>,
    token: CancellationToken,
) {
    let mut failures: u32 = 0;
    let mut connected_once = false;

    'outer: loop {
        shared.set_state(if connected_once {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        });

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => break 'outer,
            result = connector.connect() => result,
        };

        match result {
            Ok(Link {
                outgoing,
                mut incoming,
            }) => {
                failures = 0;
                {
                    let mut slot = shared.slot();
                    if token.is_cancelled() {
                        break 'outer;
                    }
                    for (_, listener) in &slot.listeners {
                        for frame in listener() {
                            let _ = outgoing.send(frame);
                        }
                    }
                    slot.outgoing = Some(outgoing);
                }
                shared.set_state(ConnectionState::Connected);
                if connected_once {
                    log::info!("Reconnected to relay");
                } else {
                    log::info!("Connected to relay");
                }
                connected_once = true;

                loop {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break 'outer,
                        next = incoming.recv() => match next {
                            Some(frame) => {
                                if inbound.send(frame).is_err() {
                                    log::trace!("Inbound consumer gone; frame discarded");
                                }
                            }
                            None => break,
                        },
                    }
                }

                shared.slot().outgoing = None;
                log::warn!("Relay connection lost");
            }
            Err(e) => {
                log::warn!("Relay connect failed: {e}");
            }
        }

        if !config.reconnect {
            break;
        }
        failures = failures.saturating_add(1);
        shared.set_state(ConnectionState::Reconnecting);
        tokio::select! {
            biased;
            _ = token.cancelled() => break 'outer,
            _ = tokio::time::sleep(config.backoff(failures)) => {}
        }
    }

    shared.slot().outgoing = None;
    shared.set_state(ConnectionState::Disconnected);
}
