//! [`DecryptGateway`]: the only path by which a stored secret becomes plaintext.
//!
//! # Decision order
//!
//! 1. Attestation document verified against the process policy.
//! 2. Requested `(key_id, token_version)` checked against one snapshot of the
//!    active key binding.
//! 3. Revoked secrets refused.
//! 4. Verified measurement checked against the KMS measurement policy.
//! 5. KMS decrypt.
//!
//! Steps 1–4 are local and cheap; the remote call in step 5 is never reached
//! when any of them denies. There is no retry and no cached verdict. Every
//! outcome produces exactly one audit event.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::protocol::SecretStatus;
use common::{AttestationDocument, ServiceError};
use thiserror::Error;
use tracing::debug;

use crate::attestation::{
    self, AttestationError, AttestationPolicy, AttestationSource, MeasurementAllowlist,
};
use crate::audit::{
    fingerprint, AuditEvent, AuditEventType, AuditResult, AuditSink, RedactedMetadata,
};
use crate::binding::{self, KeyBinding, KeyBindingError, KeyBindingStore};
use crate::kms::{KmsClient, KmsDecryptRequest, KmsError, Plaintext};

/// A stored secret as the caller holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRecord {
    pub ciphertext: Bytes,
    /// Key version recorded at encrypt time.
    pub token_version: u32,
    pub status: SecretStatus,
}

impl SecretRecord {
    pub fn active(ciphertext: impl Into<Bytes>, token_version: u32) -> Self {
        Self {
            ciphertext: ciphertext.into(),
            token_version,
            status: SecretStatus::Active,
        }
    }
}

/// Why a decrypt did not produce plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("attestation denied: {0}")]
    Attestation(#[from] AttestationError),

    #[error("key binding denied: {0}")]
    KeyBinding(#[from] KeyBindingError),

    #[error("secret has been revoked")]
    Revoked,

    #[error("kms failure: {0}")]
    Kms(#[from] KmsError),
}

impl GatewayError {
    fn audit_result(&self) -> AuditResult {
        match self {
            GatewayError::Attestation(e) => AuditResult::Denied(e.code()),
            GatewayError::KeyBinding(_) => AuditResult::Denied("version_mismatch"),
            GatewayError::Revoked => AuditResult::Denied("revoked"),
            GatewayError::Kms(e @ KmsError::MeasurementNotAuthorized) => AuditResult::Denied(e.code()),
            GatewayError::Kms(e) => AuditResult::Failed(e.code()),
        }
    }
}

/// Caller-facing mapping. Messages are generic: no measurement, runtime, or
/// key-version detail leaves the process.
impl From<&GatewayError> for ServiceError {
    fn from(err: &GatewayError) -> Self {
        match err {
            GatewayError::Attestation(AttestationError::Unavailable(_)) => {
                ServiceError::Unavailable("attestation document unavailable".into())
            }
            GatewayError::Attestation(_) => ServiceError::Denied("request denied".into()),
            GatewayError::Kms(KmsError::MeasurementNotAuthorized) => {
                ServiceError::Denied("request denied".into())
            }
            GatewayError::KeyBinding(_) => {
                ServiceError::Conflict("secret key version does not match the active key".into())
            }
            GatewayError::Revoked => ServiceError::Gone("secret has been revoked".into()),
            GatewayError::Kms(_) => ServiceError::Upstream("key service failure".into()),
        }
    }
}

/// Composes attestation, key binding, and KMS into one fail-closed decrypt.
#[derive(Clone)]
pub struct DecryptGateway {
    policy: Arc<AttestationPolicy>,
    kms_measurements: Arc<MeasurementAllowlist>,
    binding: KeyBindingStore,
    kms: Arc<dyn KmsClient>,
    source: Arc<dyn AttestationSource>,
    audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for DecryptGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptGateway")
            .field("bypass", &self.policy.is_bypass())
            .field("binding", &self.binding.current())
            .finish_non_exhaustive()
    }
}

impl DecryptGateway {
    pub fn new(
        policy: AttestationPolicy,
        kms_measurements: MeasurementAllowlist,
        binding: KeyBindingStore,
        kms: Arc<dyn KmsClient>,
        source: Arc<dyn AttestationSource>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            policy: Arc::new(policy),
            kms_measurements: Arc::new(kms_measurements),
            binding,
            kms,
            source,
            audit,
        }
    }

    /// Snapshot of the active key binding.
    pub fn binding(&self) -> Arc<KeyBinding> {
        self.binding.current()
    }

    /// Decrypt `secret` using the document currently published by the runtime.
    ///
    /// # Errors
    ///
    /// See [`DecryptGateway::decrypt_at`]. A document that cannot be fetched
    /// is [`AttestationError::Unavailable`].
    pub async fn decrypt_current(
        &self,
        secret: &SecretRecord,
        key_id: &str,
    ) -> Result<Plaintext, GatewayError> {
        match self.source.fetch().await {
            // Freshness is judged at the moment the document is in hand.
            Ok(doc) => self.decrypt_at(secret, &doc, key_id, Utc::now()).await,
            Err(e) => {
                let err = GatewayError::Attestation(e);
                let binding = self.binding.current();
                self.audit.record(self.event(secret, key_id, &binding, err.audit_result()));
                Err(err)
            }
        }
    }

    /// Decrypt `secret` with an explicitly supplied document, at the current time.
    ///
    /// # Errors
    ///
    /// See [`DecryptGateway::decrypt_at`].
    pub async fn decrypt(
        &self,
        secret: &SecretRecord,
        doc: &AttestationDocument,
        key_id: &str,
    ) -> Result<Plaintext, GatewayError> {
        self.decrypt_at(secret, doc, key_id, Utc::now()).await
    }

    /// Decrypt `secret`, judging document freshness against `now`.
    ///
    /// # Errors
    ///
    /// Returns the first denial ([`GatewayError::Attestation`],
    /// [`GatewayError::KeyBinding`], [`GatewayError::Revoked`]) without calling
    /// KMS, or [`GatewayError::Kms`] if the remote call fails.
    pub async fn decrypt_at(
        &self,
        secret: &SecretRecord,
        doc: &AttestationDocument,
        key_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Plaintext, GatewayError> {
        let binding = self.binding.current();
        let outcome = self.authorize_and_decrypt(secret, doc, key_id, &binding, now).await;

        let result = match &outcome {
            Ok(_) => AuditResult::Allowed,
            Err(e) => e.audit_result(),
        };
        self.audit.record(self.event(secret, key_id, &binding, result));
        outcome
    }

    /// Whether the current document would pass verification right now.
    pub async fn attestation_ready(&self) -> bool {
        match self.source.fetch().await {
            Ok(doc) => attestation::verify(&doc, &self.policy, Utc::now()).is_ok(),
            Err(_) => false,
        }
    }

    async fn authorize_and_decrypt(
        &self,
        secret: &SecretRecord,
        doc: &AttestationDocument,
        key_id: &str,
        binding: &KeyBinding,
        now: DateTime<Utc>,
    ) -> Result<Plaintext, GatewayError> {
        let verified = attestation::verify(doc, &self.policy, now)?;
        binding::check(key_id, secret.token_version, binding)?;

        if secret.status == SecretStatus::Revoked {
            return Err(GatewayError::Revoked);
        }
        if let Some(measurement) = verified.measurement() {
            if !self.kms_measurements.contains(measurement) {
                return Err(KmsError::MeasurementNotAuthorized.into());
            }
        }

        debug!(key_id = %binding.key_id, key_version = binding.active_version, "forwarding decrypt to kms");
        let plaintext = self
            .kms
            .decrypt(KmsDecryptRequest {
                key_id: binding.key_id.clone(),
                key_version: binding.active_version,
                ciphertext: secret.ciphertext.clone(),
            })
            .await?;
        Ok(plaintext)
    }

    fn event(
        &self,
        secret: &SecretRecord,
        key_id: &str,
        binding: &KeyBinding,
        result: AuditResult,
    ) -> AuditEvent {
        AuditEvent {
            event_type: AuditEventType::Decrypt,
            result,
            metadata: RedactedMetadata {
                key_id: key_id.to_owned(),
                requested_version: secret.token_version,
                active_version: Some(binding.active_version),
                ciphertext_fingerprint: fingerprint(&secret.ciphertext),
                attestation_bypassed: self.policy.is_bypass(),
            },
        }
    }
}
