//! Symmetric envelope encryption for relayed payloads.
//!
//! Every payload that crosses the relay is sealed with the session's
//! AES-256-GCM key:
//!
//! ```text
//!  plaintext (JSON) ──► AES-256-GCM(key, fresh 96-bit IV) ──► { iv, data }
//!                                                              base64url
//! ```
//!
//! The key is exported as unpadded base64url (the `k` member of a JWK) so it
//! can travel inside a share link fragment and never reaches the relay.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 12;

/// AES-256-GCM key. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_LEN]);

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

impl SecretKey {
    fn cipher(&self) -> Result<Aes256Gcm, CryptoError> {
        Aes256Gcm::new_from_slice(&self.0).map_err(|_| CryptoError::InvalidKey)
    }
}

/// Sealed payload as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub iv: String,
    pub data: String,
}

pub fn generate_key() -> SecretKey {
    let mut key = [0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    SecretKey(key)
}

/// Export raw key bytes as unpadded base64url.
pub fn export_key(key: &SecretKey) -> String {
    URL_SAFE_NO_PAD.encode(key.0)
}

/// Inverse of [`export_key`].
pub fn import_key(material: &str) -> Result<SecretKey, CryptoError> {
    let mut bytes = URL_SAFE_NO_PAD
        .decode(material.trim())
        .map_err(|_| CryptoError::InvalidKey)?;
    if bytes.len() != KEY_LEN {
        bytes.zeroize();
        return Err(CryptoError::InvalidKey);
    }
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&bytes);
    bytes.zeroize();
    Ok(SecretKey(key))
}

/// Encrypt `plaintext` under `key` with a fresh random IV.
pub fn encrypt_to_json(plaintext: &str, key: &SecretKey) -> Result<Envelope, CryptoError> {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let data = key
        .cipher()?
        .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
        .map_err(|_| CryptoError::Encrypt)?;

    Ok(Envelope {
        iv: URL_SAFE_NO_PAD.encode(iv),
        data: URL_SAFE_NO_PAD.encode(data),
    })
}

/// Decrypt an [`Envelope`]. Any malformed field, wrong key or tampered
/// ciphertext yields [`CryptoError::Decrypt`].
pub fn decrypt_from_json(envelope: &Envelope, key: &SecretKey) -> Result<String, CryptoError> {
    let iv = URL_SAFE_NO_PAD
        .decode(&envelope.iv)
        .map_err(|_| CryptoError::Decrypt)?;
    if iv.len() != IV_LEN {
        return Err(CryptoError::Decrypt);
    }
    let data = URL_SAFE_NO_PAD
        .decode(&envelope.data)
        .map_err(|_| CryptoError::Decrypt)?;

    let plaintext = key
        .cipher()?
        .decrypt(Nonce::from_slice(&iv), data.as_slice())
        .map_err(|_| CryptoError::Decrypt)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
}
