//! Audit trail for decrypt outcomes.
//!
//! Storage is not this crate's concern: [`AuditSink`] is the seam, and
//! [`TracingAuditSink`] emits structured events on the `audit` target for the
//! log pipeline to ship. Metadata is redacted; ciphertext appears only as a
//! truncated SHA-256 fingerprint.

use std::sync::Mutex;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

/// Kind of audited event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Decrypt,
}

/// Whether the audited request succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "code", rename_all = "snake_case")]
pub enum AuditResult {
    Allowed,
    Denied(&'static str),
    Failed(&'static str),
}

impl AuditResult {
    pub fn label(&self) -> &'static str {
        match self {
            AuditResult::Allowed => "allowed",
            AuditResult::Denied(_) => "denied",
            AuditResult::Failed(_) => "failed",
        }
    }
}

/// Metadata that is safe to persist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RedactedMetadata {
    pub key_id: String,
    pub requested_version: u32,
    pub active_version: Option<u32>,
    pub ciphertext_fingerprint: String,
    pub attestation_bypassed: bool,
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub result: AuditResult,
    pub metadata: RedactedMetadata,
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits audit events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let m = &event.metadata;
        match &event.result {
            AuditResult::Allowed => info!(
                target: "audit",
                event_type = ?event.event_type,
                result = "allowed",
                key_id = %m.key_id,
                requested_version = m.requested_version,
                active_version = ?m.active_version,
                ciphertext_fingerprint = %m.ciphertext_fingerprint,
                attestation_bypassed = m.attestation_bypassed,
                "decrypt allowed"
            ),
            AuditResult::Denied(code) | AuditResult::Failed(code) => warn!(
                target: "audit",
                event_type = ?event.event_type,
                result = event.result.label(),
                code = %code,
                key_id = %m.key_id,
                requested_version = m.requested_version,
                active_version = ?m.active_version,
                ciphertext_fingerprint = %m.ciphertext_fingerprint,
                attestation_bypassed = m.attestation_bypassed,
                "decrypt rejected"
            ),
        }
    }
}

/// Keeps events in memory. Useful for tests and embedding callers.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// First 8 bytes of SHA-256, hex encoded.
pub fn fingerprint(bytes: &[u8]) -> String {
    Sha256::digest(bytes)[..8]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_short_and_stable() {
        let fp = fingerprint(b"ciphertext");
        assert_eq!(fp.len(), 16);
        assert_eq!(fp, fingerprint(b"ciphertext"));
        assert_ne!(fp, fingerprint(b"ciphertext2"));
    }

    #[test]
    fn memory_sink_collects_events() {
        let sink = MemoryAuditSink::new();
        sink.record(AuditEvent {
            event_type: AuditEventType::Decrypt,
            result: AuditResult::Denied("stale"),
            metadata: RedactedMetadata::default(),
        });
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.events()[0].result, AuditResult::Denied("stale"));
    }

    #[test]
    fn result_serialises_with_code() {
        let json = serde_json::to_value(AuditResult::Denied("stale")).unwrap();
        assert_eq!(json["outcome"], "denied");
        assert_eq!(json["code"], "stale");
    }
}
