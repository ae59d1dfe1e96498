//! Attestation document verification.

use chrono::{DateTime, Duration, Utc};
use common::AttestationDocument;
use ed25519_dalek::Signature;

use super::{AttestationError, AttestationPolicy};

/// Documents issued further than this in the future are treated as stale.
pub const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Outcome of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verified {
    /// Every check passed for this measurement.
    Attested { measurement: String },
    /// The development bypass capability was in force.
    Bypassed,
}

impl Verified {
    /// The attested measurement, if any.
    pub fn measurement(&self) -> Option<&str> {
        match self {
            Verified::Attested { measurement } => Some(measurement),
            Verified::Bypassed => None,
        }
    }
}

/// Verify `doc` against `policy` at time `now`.
///
/// Checks run in order and the first failure wins: freshness, signature,
/// measurement membership, runtime identity.
///
/// # Errors
///
/// Returns the [`AttestationError`] of the first failing check.
pub fn verify(
    doc: &AttestationDocument,
    policy: &AttestationPolicy,
    now: DateTime<Utc>,
) -> Result<Verified, AttestationError> {
    let policy = match policy {
        AttestationPolicy::DevBypass(_) => return Ok(Verified::Bypassed),
        AttestationPolicy::Enforced(p) => p,
    };

    // An expired document is refused whatever its signature says.
    let age = now.signed_duration_since(doc.issued_at);
    if age > policy.max_age() || age < -Duration::seconds(MAX_CLOCK_SKEW_SECS) {
        return Err(AttestationError::Stale {
            age_secs: age.num_seconds(),
            max_age_secs: policy.max_age().num_seconds(),
        });
    }

    let signature =
        Signature::from_slice(&doc.signature).map_err(|_| AttestationError::SignatureInvalid)?;
    policy
        .verifying_key()
        .verify_strict(&doc.payload(), &signature)
        .map_err(|_| AttestationError::SignatureInvalid)?;

    if !policy.allowlist().contains(&doc.measurement) {
        return Err(AttestationError::MeasurementNotAllowed);
    }

    if doc.runtime != policy.expected_runtime() {
        return Err(AttestationError::RuntimeMismatch);
    }

    Ok(Verified::Attested {
        measurement: doc.measurement.clone(),
    })
}
