//! Axum HTTP server exposing the gateway to API and worker processes.
//!
//! # Responsibilities
//! - Define the router with `POST /decrypt` and `GET /health`.
//! - Translate [`crate::decrypt::GatewayError`] into generic HTTP errors.

pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;
