//! Payload protection for envelope payloads
//!
//! Optional zlib compression and optional AES-256-GCM encryption applied to
//! the serialized inner message before hex encoding. The key is injected from
//! configuration; both ends must agree out-of-band on whether compression and
//! encryption are in use.

use crate::error::ProtocolError;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Length of the AES-GCM nonce prepended to every ciphertext
const NONCE_LEN: usize = 12;

/// Symmetric cipher for envelope payloads.
///
/// Wire format: `nonce (12 bytes) || ciphertext`. A fresh random nonce is
/// drawn per message.
pub struct PayloadCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadCipher").finish_non_exhaustive()
    }
}

impl PayloadCipher {
    /// Create a cipher from a 32-byte key
    pub fn new(key: &[u8; 32]) -> Self {
        PayloadCipher {
            cipher: Aes256Gcm::new(key.into()),
        }
    }

    /// Create a cipher from a hex-encoded 32-byte key
    pub fn from_hex_key(key: &str) -> Result<Self, ProtocolError> {
        let bytes = hex::decode(key)
            .map_err(|e| ProtocolError::Cipher(format!("invalid key hex: {e}")))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ProtocolError::Cipher("key must be 32 bytes".to_string()))?;
        Ok(Self::new(&key))
    }

    /// Encrypt a payload, prepending the nonce
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| ProtocolError::Cipher(format!("encrypt: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a nonce-prefixed payload
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        if data.len() < NONCE_LEN {
            return Err(ProtocolError::Cipher("ciphertext too short".to_string()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| ProtocolError::Cipher(format!("decrypt: {e}")))
    }
}

/// Compress a payload with zlib at maximum level
pub fn compress(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| ProtocolError::Compression(format!("compress: {e}")))
}

/// Decompress a zlib payload
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ProtocolError::Compression(format!("decompress: {e}")))?;
    Ok(out)
}
