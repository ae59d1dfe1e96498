//! Tracing subscriber and optional OpenTelemetry export.
//!
//! # Telemetry invariants
//!
//! - **No plaintext, ciphertext or key material** appears in any span
//!   attribute or log field. Ciphertexts are referenced by fingerprint only.
//! - Log level is configurable via `LOG_LEVEL` (default: `info`).
//! - Spans are exported over OTLP/gRPC only when `OTEL_EXPORTER_OTLP_ENDPOINT`
//!   is set; otherwise logs go to stdout as JSON.

pub mod init;

pub use init::init_telemetry;
