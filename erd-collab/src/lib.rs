//! # erd-collab — Encrypted live sharing of ERD documents
//!
//! One host shares a document through a relay; guests join with a share
//! descriptor (room id + key) obtained out of band.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐                      ┌────────────────┐
//! │ SessionManager │      JSON frames     │ GuestSession   │
//! │ (host)         │ ◄──── relay ───────► │ (per guest)    │
//! └───────┬────────┘  payloads sealed     └───────┬────────┘
//!         │           with AES-256-GCM            │
//!         ▼                                       ▼
//! ┌────────────────┐                      ┌────────────────┐
//! │ SchemaRepository│                     │ erd_core::Store│
//! │ (host stores)  │                      │ (mirror)       │
//! └────────────────┘                      └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`crypto`] — Key generation/export and envelope encryption
//! - [`protocol`] — Frames, identifiers and replication batches
//! - [`transport`] — Reconnecting relay link (WebSocket, loopback)
//! - [`persistence`] — Snapshot/replication collaborator contract
//! - [`session`] — Host-side session manager
//! - [`guest`] — Guest-side room mirror
//! - [`config`] — Configuration

pub mod config;
pub mod crypto;
pub mod error;
pub mod guest;
pub mod persistence;
pub mod protocol;
pub mod session;
pub mod transport;

pub use config::{CollabConfig, TransportConfig};
pub use crypto::{decrypt_from_json, encrypt_to_json, export_key, generate_key, import_key, Envelope, SecretKey};
pub use error::{CollabError, CryptoError, ProtocolError, TransportError};
pub use guest::GuestSession;
pub use persistence::{MemoryRepository, SchemaRepository};
pub use protocol::{DocumentId, Frame, PeerId, ReplicationBatch, RoomId, ShareDescriptor};
pub use session::{CollabEvent, SessionManager};
pub use transport::loopback::LoopbackRelay;
pub use transport::ws::WsConnector;
pub use transport::{ConnectionState, Connector, RelayTransport};
