//! Request and response types exchanged between components.
//!
//! These types are serialised as JSON over the gateway's HTTP API and, for
//! [`AttestationDocument`], in the document file the trusted runtime writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Attestation document
// ---------------------------------------------------------------------------

/// Domain-separation tag prefixed to every attestation signing payload.
pub const ATTESTATION_DOMAIN_TAG: &[u8] = b"attested-decrypt/v1";

/// Signed statement from the trusted runtime about its identity.
///
/// Produced and refreshed by the runtime; read-only to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationDocument {
    /// Runtime identity string (e.g. `"nitro"`).
    pub runtime: String,
    /// Measurement of the running image, checked against the allowlist.
    pub measurement: String,
    /// When the runtime issued this document.
    pub issued_at: DateTime<Utc>,
    /// Signature over [`AttestationDocument::signing_payload`].
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
}

impl AttestationDocument {
    /// Canonical bytes covered by the document signature.
    ///
    /// Layout: domain tag, then `runtime` and `measurement` as u32 big-endian
    /// length followed by UTF-8 bytes, then `issued_at` as i64 big-endian
    /// Unix seconds.
    pub fn signing_payload(runtime: &str, measurement: &str, issued_at: DateTime<Utc>) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            ATTESTATION_DOMAIN_TAG.len() + 8 + runtime.len() + measurement.len() + 8,
        );
        out.extend_from_slice(ATTESTATION_DOMAIN_TAG);
        for field in [runtime, measurement] {
            out.extend_from_slice(&(field.len() as u32).to_be_bytes());
            out.extend_from_slice(field.as_bytes());
        }
        out.extend_from_slice(&issued_at.timestamp().to_be_bytes());
        out
    }

    /// The signing payload for this document's own fields.
    pub fn payload(&self) -> Vec<u8> {
        Self::signing_payload(&self.runtime, &self.measurement, self.issued_at)
    }
}

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

/// Lifecycle status of a stored secret.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretStatus {
    #[default]
    #[serde(alias = "ACTIVE")]
    Active,
    #[serde(alias = "REVOKED")]
    Revoked,
}

// ---------------------------------------------------------------------------
// Decrypt endpoint
// ---------------------------------------------------------------------------

/// Request body for `POST /decrypt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptRequest {
    /// Key identifier the secret was encrypted under.
    pub key_id: String,
    /// Base64 (standard alphabet) ciphertext.
    pub ciphertext: String,
    /// Key version recorded with the secret at encrypt time.
    pub token_version: u32,
    /// Stored status of the secret.
    #[serde(default)]
    pub status: SecretStatus,
}

/// Successful response body for `POST /decrypt`.
#[derive(Clone, Serialize, Deserialize)]
pub struct DecryptResponse {
    /// Base64 (standard alphabet) plaintext.
    pub plaintext: String,
}

impl std::fmt::Debug for DecryptResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DecryptResponse([REDACTED])")
    }
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error response body returned on any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"attestation_denied"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service status: `"ok"` or `"degraded"`.
    pub status: String,
    /// Active key identifier.
    pub key_id: String,
    /// Active key version.
    pub key_version: u32,
    /// Whether the current attestation document verifies.
    pub attestation_ready: bool,
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s.trim()).map_err(serde::de::Error::custom)
    }
}
