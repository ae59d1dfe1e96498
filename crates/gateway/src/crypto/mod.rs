//! AES-256-GCM-SIV sealing primitives for the development KMS.
//!
//! Free of AWS and HTTP dependencies.
//!
//! # Blob format
//!
//! ```text
//! v1.<base64url-no-pad(nonce)>.<base64url-no-pad(ciphertext+tag)>
//! ```

pub mod cipher;

pub use cipher::KEY_LEN;
