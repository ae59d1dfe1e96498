//! Axum request handlers for all service endpoints.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use common::protocol::{DecryptRequest, DecryptResponse, ErrorResponse, HealthResponse};
use common::ServiceError;
use tracing::warn;

use super::state::AppState;
use crate::decrypt::SecretRecord;

fn error_response(err: &ServiceError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorResponse::new(err.code(), err.to_string());
    (status, Json(body)).into_response()
}

/// `POST /decrypt`: decrypt one secret after attestation and key-binding checks.
pub async fn decrypt(
    State(state): State<AppState>,
    payload: Result<Json<DecryptRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(req) => req,
        Err(rejection) => {
            return error_response(&ServiceError::BadRequest(rejection.body_text()));
        }
    };

    let ciphertext = match STANDARD.decode(req.ciphertext.trim()) {
        Ok(ct) if !ct.is_empty() => Bytes::from(ct),
        _ => {
            return error_response(&ServiceError::BadRequest(
                "ciphertext must be non-empty base64".into(),
            ));
        }
    };

    let secret = SecretRecord {
        ciphertext,
        token_version: req.token_version,
        status: req.status,
    };

    match state.gateway.decrypt_current(&secret, &req.key_id).await {
        Ok(plaintext) => {
            let body = DecryptResponse {
                plaintext: STANDARD.encode(plaintext.as_bytes()),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => {
            warn!(error = %e, key_id = %req.key_id, token_version = req.token_version, "decrypt refused");
            error_response(&ServiceError::from(&e))
        }
    }
}

/// `GET /health`: liveness and readiness check.
///
/// Returns `200 OK` when the current attestation document verifies.
/// Returns `503 Service Unavailable` otherwise.
pub async fn health(State(state): State<AppState>) -> Response {
    let binding = state.gateway.binding();
    let attestation_ready = state.gateway.attestation_ready().await;

    let (status_code, status_str) = if attestation_ready {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    let body = HealthResponse {
        status: status_str.into(),
        key_id: binding.key_id.clone(),
        key_version: binding.active_version,
        attestation_ready,
    };
    (status_code, Json(body)).into_response()
}

/// Catch-all 404 handler.
pub async fn not_found() -> impl IntoResponse {
    let err = ErrorResponse::new("not_found", "the requested resource does not exist");
    (StatusCode::NOT_FOUND, Json(err))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::attestation::verifier::tests::{policy, signed_doc, signing_key, MEASUREMENT, RUNTIME};
    use crate::attestation::{InlineSource, MeasurementAllowlist};
    use crate::audit::MemoryAuditSink;
    use crate::binding::{KeyBinding, KeyBindingStore};
    use crate::crypto::KEY_LEN;
    use crate::decrypt::DecryptGateway;
    use crate::kms::LocalKms;
    use axum::routing::{get, post};
    use axum::{body::Body, http::Request, Router};
    use chrono::{Duration, Utc};
    use tower::ServiceExt;

    pub(crate) const KEY_ID: &str = "connector-tokens";

    pub(crate) fn kms() -> LocalKms {
        LocalKms::new(KEY_ID).with_key(1, [0x11; KEY_LEN])
    }

    /// State whose attestation document is fresh (or an hour old when `fresh` is false).
    pub(crate) fn test_state(fresh: bool) -> AppState {
        let issued_at = if fresh {
            Utc::now()
        } else {
            Utc::now() - Duration::hours(1)
        };
        let doc = signed_doc(&signing_key(), RUNTIME, MEASUREMENT, issued_at);
        AppState::new(DecryptGateway::new(
            policy(),
            MeasurementAllowlist::new([MEASUREMENT]),
            KeyBindingStore::new(KeyBinding::new(KEY_ID, 1)),
            Arc::new(kms()),
            Arc::new(InlineSource::new(doc)),
            Arc::new(MemoryAuditSink::new()),
        ))
    }

    fn app(state: AppState) -> Router {
        Router::new()
            .route("/decrypt", post(decrypt))
            .route("/health", get(health))
            .with_state(state)
    }

    fn decrypt_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/decrypt")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn decrypt_returns_plaintext() {
        let ct = kms().encrypt(1, b"refresh-token").unwrap();
        let resp = app(test_state(true))
            .oneshot(decrypt_request(serde_json::json!({
                "key_id": KEY_ID,
                "ciphertext": STANDARD.encode(ct),
                "token_version": 1
            })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(
            STANDARD.decode(body["plaintext"].as_str().unwrap()).unwrap(),
            b"refresh-token"
        );
    }

    #[tokio::test]
    async fn version_mismatch_is_409() {
        let ct = kms().encrypt(1, b"refresh-token").unwrap();
        let resp = app(test_state(true))
            .oneshot(decrypt_request(serde_json::json!({
                "key_id": KEY_ID,
                "ciphertext": STANDARD.encode(ct),
                "token_version": 2
            })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(resp).await["code"], "key_version_mismatch");
    }

    #[tokio::test]
    async fn stale_attestation_is_403_without_details() {
        let ct = kms().encrypt(1, b"refresh-token").unwrap();
        let resp = app(test_state(false))
            .oneshot(decrypt_request(serde_json::json!({
                "key_id": KEY_ID,
                "ciphertext": STANDARD.encode(ct),
                "token_version": 1
            })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body = body_json(resp).await;
        assert_eq!(body["code"], "attestation_denied");
        assert!(!body["message"].as_str().unwrap().contains(MEASUREMENT));
    }

    #[tokio::test]
    async fn revoked_secret_is_410() {
        let ct = kms().encrypt(1, b"refresh-token").unwrap();
        let resp = app(test_state(true))
            .oneshot(decrypt_request(serde_json::json!({
                "key_id": KEY_ID,
                "ciphertext": STANDARD.encode(ct),
                "token_version": 1,
                "status": "revoked"
            })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn bad_base64_is_400() {
        let resp = app(test_state(true))
            .oneshot(decrypt_request(serde_json::json!({
                "key_id": KEY_ID,
                "ciphertext": "!!!",
                "token_version": 1
            })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_json_is_400() {
        let resp = app(test_state(true))
            .oneshot(decrypt_request(serde_json::json!({ "key_id": KEY_ID })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["code"], "bad_request");
    }

    #[tokio::test]
    async fn health_reflects_attestation() {
        let resp = app(test_state(true))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["key_version"], 1);
        assert_eq!(body["attestation_ready"], true);

        let resp = app(test_state(false))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
