//! Common types, protocol definitions, and errors shared across the
//! attested-decrypt gateway and the key-rotation controller.

pub mod environment;
pub mod error;
pub mod protocol;

pub use environment::{DeploymentTarget, Environment};
pub use error::ServiceError;
pub use protocol::AttestationDocument;
