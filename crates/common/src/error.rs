//! Common error types shared across crates.

use thiserror::Error;

/// Top-level service error type.
///
/// Variants map to HTTP status codes returned to callers:
/// - [`ServiceError::BadRequest`] → 400
/// - [`ServiceError::Denied`] → 403
/// - [`ServiceError::Conflict`] → 409
/// - [`ServiceError::Gone`] → 410
/// - [`ServiceError::Upstream`] → 502
/// - [`ServiceError::Unavailable`] → 503
///
/// Messages are safe to expose to callers: they never carry measurements,
/// runtime identities or key material.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request was malformed: invalid JSON or undecodable ciphertext.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Attestation policy denied the request.
    #[error("denied: {0}")]
    Denied(String),

    /// The requested key binding does not match the active one.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The secret has been revoked.
    #[error("gone: {0}")]
    Gone(String),

    /// The key-management service rejected or failed the call.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// A required resource (attestation document, key binding) is unavailable.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// An unexpected internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Returns the HTTP status code that should be sent for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            ServiceError::BadRequest(_) => 400,
            ServiceError::Denied(_) => 403,
            ServiceError::Conflict(_) => 409,
            ServiceError::Gone(_) => 410,
            ServiceError::Upstream(_) => 502,
            ServiceError::Unavailable(_) => 503,
            ServiceError::Internal(_) => 500,
        }
    }

    /// Short machine-readable code for the error body.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::BadRequest(_) => "bad_request",
            ServiceError::Denied(_) => "attestation_denied",
            ServiceError::Conflict(_) => "key_version_mismatch",
            ServiceError::Gone(_) => "secret_revoked",
            ServiceError::Upstream(_) => "kms_failure",
            ServiceError::Unavailable(_) => "service_unavailable",
            ServiceError::Internal(_) => "internal_error",
        }
    }
}
