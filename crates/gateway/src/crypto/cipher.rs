//! AES-256-GCM-SIV sealing used by the development KMS.
//!
//! Every blob is bound to the `(key_id, key_version)` it was sealed under via
//! associated data, so a blob replayed against another version fails
//! authentication even if the key bytes were reused.

use aes_gcm_siv::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256GcmSiv, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use thiserror::Error;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of an AES-GCM-SIV nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Prefix that appears at the start of every sealed blob.
pub const VERSION_PREFIX: &str = "v1";

/// A parsed sealed blob.
///
/// The encoded form is `v1.<base64url(nonce)>.<base64url(ciphertext+tag)>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBlob {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

impl SealedBlob {
    /// Encode to the canonical byte representation stored as a secret's ciphertext.
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "{}.{}.{}",
            VERSION_PREFIX,
            URL_SAFE_NO_PAD.encode(self.nonce),
            URL_SAFE_NO_PAD.encode(&self.ciphertext),
        )
        .into_bytes()
    }

    /// Parse the canonical representation.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidFormat`] if the bytes are not a
    /// `v1.<nonce>.<ciphertext>` string.
    pub fn decode(raw: &[u8]) -> Result<Self, CipherError> {
        let s = std::str::from_utf8(raw).map_err(|_| CipherError::InvalidFormat)?;
        let mut parts = s.splitn(3, '.');
        let (Some(prefix), Some(nonce_b64), Some(ct_b64)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(CipherError::InvalidFormat);
        };
        if prefix != VERSION_PREFIX {
            return Err(CipherError::InvalidFormat);
        }
        let nonce_bytes = URL_SAFE_NO_PAD
            .decode(nonce_b64)
            .map_err(|_| CipherError::InvalidFormat)?;
        let nonce: [u8; NONCE_LEN] = nonce_bytes
            .try_into()
            .map_err(|_| CipherError::InvalidFormat)?;
        let ciphertext = URL_SAFE_NO_PAD
            .decode(ct_b64)
            .map_err(|_| CipherError::InvalidFormat)?;
        Ok(Self { nonce, ciphertext })
    }
}

/// Errors produced by the cipher layer.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("invalid key length: expected {KEY_LEN} bytes")]
    InvalidKeyLength,

    /// Authentication failed: wrong key, wrong binding, or tampered data.
    #[error("aead operation failed")]
    AeadFailure,

    #[error("invalid sealed blob format")]
    InvalidFormat,
}

/// Associated data binding a blob to its key identity.
pub fn binding_aad(key_id: &str, key_version: u32) -> Vec<u8> {
    format!("{key_id}#{key_version}").into_bytes()
}

/// Seal `plaintext` under `key` with a fresh random nonce.
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] if `key` is not [`KEY_LEN`] bytes.
pub fn seal(plaintext: &[u8], key: &[u8], aad: &[u8]) -> Result<SealedBlob, CipherError> {
    let cipher = build_cipher(key)?;

    use aes_gcm_siv::aead::rand_core::RngCore;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CipherError::AeadFailure)?;

    Ok(SealedBlob {
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Open a [`SealedBlob`] back to plaintext bytes.
///
/// # Errors
///
/// Returns [`CipherError::AeadFailure`] if authentication fails.
pub fn open(blob: &SealedBlob, key: &[u8], aad: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = build_cipher(key)?;
    cipher
        .decrypt(
            Nonce::from_slice(&blob.nonce),
            Payload {
                msg: blob.ciphertext.as_ref(),
                aad,
            },
        )
        .map_err(|_| CipherError::AeadFailure)
}

fn build_cipher(key: &[u8]) -> Result<Aes256GcmSiv, CipherError> {
    if key.len() != KEY_LEN {
        return Err(CipherError::InvalidKeyLength);
    }
    Aes256GcmSiv::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; KEY_LEN] = [0x42; KEY_LEN];

    #[test]
    fn seal_open_round_trip() {
        let aad = binding_aad("connector-tokens", 1);
        let blob = seal(b"refresh-token", &KEY, &aad).unwrap();
        let decoded = SealedBlob::decode(&blob.encode()).unwrap();
        assert_eq!(open(&decoded, &KEY, &aad).unwrap(), b"refresh-token");
    }

    #[test]
    fn other_version_fails_auth() {
        let blob = seal(b"refresh-token", &KEY, &binding_aad("k", 1)).unwrap();
        assert!(matches!(
            open(&blob, &KEY, &binding_aad("k", 2)),
            Err(CipherError::AeadFailure)
        ));
    }

    #[test]
    fn invalid_key_length_rejected() {
        assert!(matches!(
            seal(b"x", &[0u8; 16], b""),
            Err(CipherError::InvalidKeyLength)
        ));
    }

    #[test]
    fn decode_rejects_malformed_input() {
        assert!(SealedBlob::decode(b"v2.abc.def").is_err());
        assert!(SealedBlob::decode(b"v1.abc").is_err());
        assert!(SealedBlob::decode(b"v1.!!!.abc").is_err());
        assert!(SealedBlob::decode(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let aad = binding_aad("k", 1);
        let mut blob = seal(b"tamper me", &KEY, &aad).unwrap();
        blob.ciphertext[0] ^= 0xFF;
        assert!(open(&blob, &KEY, &aad).is_err());
    }
}
