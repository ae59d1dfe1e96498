//! Attestation policy, verification, and document sources.
//!
//! # Module invariants
//!
//! - Verification is a pure function of `(document, policy, now)`; no clock
//!   reads, no I/O, no cached verdicts.
//! - The development bypass is a capability value ([`DevBypass`]) that can only
//!   be constructed for a non-production [`DeploymentTarget`].

pub mod source;
pub mod verifier;

pub use source::{AttestationSource, FileSource, InlineSource};
pub use verifier::{verify, Verified};

use std::collections::HashSet;

use chrono::Duration;
use common::DeploymentTarget;
use ed25519_dalek::{VerifyingKey, PUBLIC_KEY_LENGTH};
use thiserror::Error;

/// Reasons an attestation document is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttestationError {
    #[error("attestation signature is invalid")]
    SignatureInvalid,

    #[error("attestation document is stale (age {age_secs}s, max {max_age_secs}s)")]
    Stale { age_secs: i64, max_age_secs: i64 },

    #[error("measurement is not in the allowlist")]
    MeasurementNotAllowed,

    #[error("runtime does not match the expected runtime")]
    RuntimeMismatch,

    /// The document could not be fetched or parsed.
    #[error("attestation document unavailable: {0}")]
    Unavailable(String),
}

impl AttestationError {
    /// Stable code used in audit metadata.
    pub fn code(&self) -> &'static str {
        match self {
            AttestationError::SignatureInvalid => "signature_invalid",
            AttestationError::Stale { .. } => "stale",
            AttestationError::MeasurementNotAllowed => "measurement_not_allowed",
            AttestationError::RuntimeMismatch => "runtime_mismatch",
            AttestationError::Unavailable(_) => "document_unavailable",
        }
    }
}

/// Errors raised while building an [`AttestationPolicy`] at startup.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("attestation public key must be {PUBLIC_KEY_LENGTH} bytes of a valid Ed25519 point")]
    InvalidPublicKey,

    #[error("measurement allowlist must not be empty")]
    EmptyAllowlist,

    #[error("expected runtime must not be empty")]
    EmptyRuntime,

    #[error("max attestation age must be > 0")]
    NonPositiveMaxAge,

    #[error("insecure development bypass refused for deployment target {0}")]
    BypassRefused(DeploymentTarget),
}

/// Set of accepted runtime measurements. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeasurementAllowlist(HashSet<String>);

impl MeasurementAllowlist {
    pub fn new<I, S>(measurements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            measurements
                .into_iter()
                .map(|m| m.as_ref().trim().to_owned())
                .filter(|m| !m.is_empty())
                .collect(),
        )
    }

    /// Parse a comma-separated list, ignoring blanks.
    pub fn parse_csv(raw: &str) -> Self {
        Self::new(raw.split(','))
    }

    pub fn contains(&self, measurement: &str) -> bool {
        self.0.contains(measurement)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Full attestation enforcement parameters.
#[derive(Debug, Clone)]
pub struct EnforcedPolicy {
    verifying_key: VerifyingKey,
    expected_runtime: String,
    allowlist: MeasurementAllowlist,
    max_age: Duration,
}

impl EnforcedPolicy {
    /// # Errors
    ///
    /// Returns a [`PolicyError`] if the key is not a valid Ed25519 public key,
    /// the runtime is blank, the allowlist is empty, or `max_age_secs` is 0.
    pub fn new(
        public_key: &[u8],
        expected_runtime: impl Into<String>,
        allowlist: MeasurementAllowlist,
        max_age_secs: u64,
    ) -> Result<Self, PolicyError> {
        let key_bytes: &[u8; PUBLIC_KEY_LENGTH] =
            public_key.try_into().map_err(|_| PolicyError::InvalidPublicKey)?;
        let verifying_key =
            VerifyingKey::from_bytes(key_bytes).map_err(|_| PolicyError::InvalidPublicKey)?;

        let expected_runtime = expected_runtime.into();
        if expected_runtime.trim().is_empty() {
            return Err(PolicyError::EmptyRuntime);
        }
        if allowlist.is_empty() {
            return Err(PolicyError::EmptyAllowlist);
        }
        if max_age_secs == 0 {
            return Err(PolicyError::NonPositiveMaxAge);
        }
        let max_age_secs = i64::try_from(max_age_secs).map_err(|_| PolicyError::NonPositiveMaxAge)?;

        Ok(Self {
            verifying_key,
            expected_runtime,
            allowlist,
            max_age: Duration::seconds(max_age_secs),
        })
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    pub fn expected_runtime(&self) -> &str {
        &self.expected_runtime
    }

    pub fn allowlist(&self) -> &MeasurementAllowlist {
        &self.allowlist
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }
}

/// Capability proving the process may skip attestation.
///
/// The private field keeps construction inside [`DevBypass::for_target`].
#[derive(Debug, Clone)]
pub struct DevBypass {
    target: DeploymentTarget,
}

impl DevBypass {
    /// # Errors
    ///
    /// Returns [`PolicyError::BypassRefused`] for production.
    pub fn for_target(target: DeploymentTarget) -> Result<Self, PolicyError> {
        if target.is_production() {
            return Err(PolicyError::BypassRefused(target));
        }
        Ok(Self { target })
    }

    pub fn target(&self) -> DeploymentTarget {
        self.target
    }
}

/// The attestation policy in force for this process.
#[derive(Debug, Clone)]
pub enum AttestationPolicy {
    Enforced(EnforcedPolicy),
    DevBypass(DevBypass),
}

impl AttestationPolicy {
    pub fn is_bypass(&self) -> bool {
        matches!(self, AttestationPolicy::DevBypass(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn public_key() -> [u8; 32] {
        SigningKey::from_bytes(&[7u8; 32]).verifying_key().to_bytes()
    }

    #[test]
    fn allowlist_parses_csv_and_trims() {
        let list = MeasurementAllowlist::parse_csv(" abc, def ,,");
        assert_eq!(list.len(), 2);
        assert!(list.contains("abc"));
        assert!(list.contains("def"));
        assert!(!list.contains(""));
    }

    #[test]
    fn bypass_refused_in_production() {
        assert!(matches!(
            DevBypass::for_target(DeploymentTarget::Production),
            Err(PolicyError::BypassRefused(DeploymentTarget::Production))
        ));
        assert!(DevBypass::for_target(DeploymentTarget::Development).is_ok());
    }

    #[test]
    fn enforced_policy_rejects_bad_inputs() {
        let list = MeasurementAllowlist::new(["m1"]);
        assert!(matches!(
            EnforcedPolicy::new(&[0u8; 16], "nitro", list.clone(), 300),
            Err(PolicyError::InvalidPublicKey)
        ));
        assert!(matches!(
            EnforcedPolicy::new(&public_key(), " ", list.clone(), 300),
            Err(PolicyError::EmptyRuntime)
        ));
        assert!(matches!(
            EnforcedPolicy::new(&public_key(), "nitro", MeasurementAllowlist::default(), 300),
            Err(PolicyError::EmptyAllowlist)
        ));
        assert!(matches!(
            EnforcedPolicy::new(&public_key(), "nitro", list, 0),
            Err(PolicyError::NonPositiveMaxAge)
        ));
    }

    #[test]
    fn error_codes_are_distinct() {
        let codes = [
            AttestationError::SignatureInvalid.code(),
            AttestationError::Stale {
                age_secs: 1,
                max_age_secs: 0,
            }
            .code(),
            AttestationError::MeasurementNotAllowed.code(),
            AttestationError::RuntimeMismatch.code(),
            AttestationError::Unavailable("x".into()).code(),
        ];
        let unique: HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
    }
}
