//! Attested-decrypt gateway.
//!
//! A secret stored under a KMS key becomes plaintext only when the calling
//! runtime presents a fresh, signed attestation document whose measurement
//! is allowlisted, and the secret's recorded key version matches the active
//! key binding. See [`decrypt::DecryptGateway`].

pub mod attestation;
pub mod audit;
pub mod binding;
pub mod config;
pub mod crypto;
pub mod decrypt;
pub mod kms;
pub mod server;
pub mod telemetry;
