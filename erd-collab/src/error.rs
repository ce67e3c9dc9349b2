use thiserror::Error;

use crate::protocol::DocumentId;

/// Key handling and envelope encryption failures.
///
/// Decryption failures deliberately carry no detail: wrong key, tampered
/// ciphertext and malformed IVs are indistinguishable to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid key material")]
    InvalidKey,
    #[error("Encryption failed")]
    Encrypt,
    #[error("Decryption failed")]
    Decrypt,
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Frame JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unexpected binary frame")]
    Binary,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Top-level error for session, guest and repository operations.
#[derive(Error, Debug)]
pub enum CollabError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),
    #[error("Not connected to relay")]
    NotConnected,
    #[error("Must be called inside a Tokio runtime")]
    NoRuntime,
}

impl From<serde_json::Error> for CollabError {
    fn from(e: serde_json::Error) -> Self {
        CollabError::Protocol(ProtocolError::Json(e))
    }
}
