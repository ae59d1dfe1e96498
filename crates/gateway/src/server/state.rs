//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::decrypt::DecryptGateway;

/// Application state shared across all request handlers.
///
/// Cheap to clone: the gateway is `Arc`-backed.
#[derive(Clone, Debug)]
pub struct AppState {
    pub gateway: Arc<DecryptGateway>,
}

impl AppState {
    pub fn new(gateway: DecryptGateway) -> Self {
        Self {
            gateway: Arc::new(gateway),
        }
    }
}
