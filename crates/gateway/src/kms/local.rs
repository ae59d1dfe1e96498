//! In-process development KMS.
//!
//! Holds one 32-byte key per version for a single key id. Ciphertexts are
//! [`SealedBlob`]s bound to `(key_id, version)`. Never used in production:
//! configuration refuses `KMS_BACKEND=local` outside development.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::{KmsClient, KmsDecryptRequest, KmsError, Plaintext};
use crate::crypto::cipher::{self, binding_aad, SealedBlob};
use crate::crypto::KEY_LEN;

/// Versioned key material for one key id.
pub struct LocalKms {
    key_id: String,
    keys: HashMap<u32, [u8; KEY_LEN]>,
}

impl std::fmt::Debug for LocalKms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut versions: Vec<_> = self.keys.keys().collect();
        versions.sort();
        f.debug_struct("LocalKms")
            .field("key_id", &self.key_id)
            .field("versions", &versions)
            .finish()
    }
}

impl Drop for LocalKms {
    fn drop(&mut self) {
        for key in self.keys.values_mut() {
            key.iter_mut().for_each(|b| *b = 0);
        }
    }
}

impl LocalKms {
    pub fn new(key_id: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            keys: HashMap::new(),
        }
    }

    /// Register key material for `version`.
    pub fn with_key(mut self, version: u32, key: [u8; KEY_LEN]) -> Self {
        self.keys.insert(version, key);
        self
    }

    /// Parse a `<version>:<base64 key>[,<version>:<base64 key>...]` list.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed entries or keys that are not 32 bytes.
    pub fn from_key_list(key_id: impl Into<String>, list: &str) -> Result<Self> {
        let mut kms = Self::new(key_id);
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (version, key_b64) = entry
                .split_once(':')
                .with_context(|| "LOCAL_KMS_KEYS entries must be <version>:<base64 key>")?;
            let version: u32 = version
                .trim()
                .parse()
                .with_context(|| format!("invalid key version in LOCAL_KMS_KEYS: {version}"))?;
            let key = STANDARD
                .decode(key_b64.trim())
                .with_context(|| format!("key for version {version} is not valid base64"))?;
            let key: [u8; KEY_LEN] = key
                .try_into()
                .map_err(|_| anyhow::anyhow!("key for version {version} must be {KEY_LEN} bytes"))?;
            kms.keys.insert(version, key);
        }
        if kms.keys.is_empty() {
            anyhow::bail!("LOCAL_KMS_KEYS must contain at least one key");
        }
        Ok(kms)
    }

    /// Encrypt `plaintext` under `version`, returning the stored ciphertext form.
    ///
    /// # Errors
    ///
    /// Returns [`KmsError::Unauthorized`] if `version` has no key.
    pub fn encrypt(&self, version: u32, plaintext: &[u8]) -> Result<Vec<u8>, KmsError> {
        let key = self.key(version)?;
        let blob = cipher::seal(plaintext, key, &binding_aad(&self.key_id, version))
            .map_err(|e| KmsError::Unauthorized(e.to_string()))?;
        Ok(blob.encode())
    }

    fn key(&self, version: u32) -> Result<&[u8; KEY_LEN], KmsError> {
        self.keys
            .get(&version)
            .ok_or_else(|| KmsError::Unauthorized(format!("no key material for version {version}")))
    }
}

#[async_trait]
impl KmsClient for LocalKms {
    async fn decrypt(&self, request: KmsDecryptRequest) -> Result<Plaintext, KmsError> {
        if request.key_id != self.key_id {
            return Err(KmsError::Unauthorized(format!("unknown key id {}", request.key_id)));
        }
        let key = self.key(request.key_version)?;
        let blob = SealedBlob::decode(&request.ciphertext)
            .map_err(|e| KmsError::Unauthorized(e.to_string()))?;
        let plaintext = cipher::open(&blob, key, &binding_aad(&self.key_id, request.key_version))
            .map_err(|e| KmsError::Unauthorized(e.to_string()))?;
        if plaintext.is_empty() {
            return Err(KmsError::EmptyPlaintext);
        }
        Ok(Plaintext::new(plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn kms() -> LocalKms {
        LocalKms::new("connector-tokens")
            .with_key(1, [0x11; KEY_LEN])
            .with_key(2, [0x22; KEY_LEN])
    }

    fn request(version: u32, ciphertext: Vec<u8>) -> KmsDecryptRequest {
        KmsDecryptRequest {
            key_id: "connector-tokens".into(),
            key_version: version,
            ciphertext: Bytes::from(ciphertext),
        }
    }

    #[tokio::test]
    async fn encrypt_then_decrypt() {
        let kms = kms();
        let ct = kms.encrypt(1, b"refresh-token").unwrap();
        let pt = kms.decrypt(request(1, ct)).await.unwrap();
        assert_eq!(pt.as_bytes(), b"refresh-token");
    }

    #[tokio::test]
    async fn wrong_version_is_unauthorized() {
        let kms = kms();
        let ct = kms.encrypt(1, b"refresh-token").unwrap();
        assert!(matches!(
            kms.decrypt(request(2, ct)).await,
            Err(KmsError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn unknown_key_id_is_unauthorized() {
        let kms = kms();
        let ct = kms.encrypt(1, b"x").unwrap();
        let mut req = request(1, ct);
        req.key_id = "other".into();
        assert!(kms.decrypt(req).await.is_err());
    }

    #[test]
    fn from_key_list_parses_entries() {
        let k1 = STANDARD.encode([1u8; KEY_LEN]);
        let k2 = STANDARD.encode([2u8; KEY_LEN]);
        let kms = LocalKms::from_key_list("k", &format!("1:{k1}, 2:{k2}")).unwrap();
        assert!(kms.key(1).is_ok());
        assert!(kms.key(2).is_ok());
        assert!(kms.key(3).is_err());
    }

    #[test]
    fn from_key_list_rejects_bad_entries() {
        assert!(LocalKms::from_key_list("k", "").is_err());
        assert!(LocalKms::from_key_list("k", "1").is_err());
        assert!(LocalKms::from_key_list("k", "x:AAAA").is_err());
        assert!(LocalKms::from_key_list("k", &format!("1:{}", STANDARD.encode([0u8; 16]))).is_err());
    }

    #[test]
    fn debug_hides_key_material() {
        let dbg = format!("{:?}", kms());
        assert!(dbg.contains("connector-tokens"));
        assert!(!dbg.contains("17"));
    }
}
