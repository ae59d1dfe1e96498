//! Axum router construction.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};

use super::{handlers, middleware, state::AppState};

/// Build the application [`Router`] with all routes and middleware attached.
pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/decrypt", post(handlers::decrypt))
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::max(middleware::MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(middleware::REQUEST_TIMEOUT))
        .layer(CompressionLayer::new())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::handlers::tests::{kms, test_state, KEY_ID};
    use axum_test::TestServer;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde_json::json;

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = TestServer::new(build(test_state(true))).unwrap();
        let resp = server.get("/unknown").await;
        resp.assert_status_not_found();
    }

    #[tokio::test]
    async fn health_route_exists() {
        let server = TestServer::new(build(test_state(true))).unwrap();
        server.get("/health").await.assert_status_ok();
    }

    #[tokio::test]
    async fn decrypt_route_round_trip() {
        let server = TestServer::new(build(test_state(true))).unwrap();
        let ct = kms().encrypt(1, b"refresh-token").unwrap();
        let resp = server
            .post("/decrypt")
            .json(&json!({
                "key_id": KEY_ID,
                "ciphertext": STANDARD.encode(ct),
                "token_version": 1
            }))
            .await;
        resp.assert_status_ok();
        let body: serde_json::Value = resp.json();
        assert_eq!(
            STANDARD.decode(body["plaintext"].as_str().unwrap()).unwrap(),
            b"refresh-token"
        );
    }

    #[tokio::test]
    async fn decrypt_requires_post() {
        let server = TestServer::new(build(test_state(true))).unwrap();
        let resp = server.get("/decrypt").await;
        assert_eq!(resp.status_code(), 405);
    }
}
