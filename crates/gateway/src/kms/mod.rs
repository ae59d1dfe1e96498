//! Key-management seam: the single remote call a decrypt may reach.
//!
//! The gateway only talks to KMS through [`KmsClient`]. Implementations:
//! - [`AwsKms`]: AWS KMS `Decrypt`.
//! - [`LocalKms`]: in-process AES-256-GCM-SIV keys, development only.

pub mod aws;
pub mod local;

pub use aws::AwsKms;
pub use local::LocalKms;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// Errors surfaced by a [`KmsClient`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KmsError {
    /// Network or SDK failure reaching the service.
    #[error("kms transport failure: {0}")]
    Transport(String),

    /// The service refused the request (key policy, disabled key, bad ciphertext).
    #[error("kms refused decrypt: {0}")]
    Unauthorized(String),

    /// The verified measurement is not permitted to use the key.
    #[error("measurement is not authorised for key use")]
    MeasurementNotAuthorized,

    /// The service returned no plaintext.
    #[error("kms returned an empty plaintext")]
    EmptyPlaintext,
}

impl KmsError {
    pub fn code(&self) -> &'static str {
        match self {
            KmsError::Transport(_) => "kms_transport",
            KmsError::Unauthorized(_) => "kms_unauthorized",
            KmsError::MeasurementNotAuthorized => "kms_measurement_not_authorized",
            KmsError::EmptyPlaintext => "kms_empty_plaintext",
        }
    }
}

/// One decrypt call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmsDecryptRequest {
    pub key_id: String,
    pub key_version: u32,
    pub ciphertext: Bytes,
}

/// Recovered plaintext. Zeroed on drop, never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Plaintext(Vec<u8>);

impl Plaintext {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for Plaintext {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for Plaintext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print secret material.
        f.write_str("Plaintext([REDACTED])")
    }
}

/// Remote decrypt operation.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KmsClient: Send + Sync {
    /// Decrypt `request.ciphertext` under `request.key_id` at `request.key_version`.
    ///
    /// # Errors
    ///
    /// Returns a [`KmsError`] on transport or authorisation failure.
    async fn decrypt(&self, request: KmsDecryptRequest) -> Result<Plaintext, KmsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_redacted_in_debug() {
        let p = Plaintext::new(b"refresh-token".to_vec());
        assert!(format!("{p:?}").contains("REDACTED"));
        assert!(!format!("{p:?}").contains("refresh"));
        assert_eq!(p.len(), 13);
    }
}
