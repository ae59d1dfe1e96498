//! `decrypt-gateway` binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise the telemetry pipeline (tracing + optional OTLP).
//! 3. Build the attestation policy and document source.
//! 4. Initialise the KMS client for the configured backend.
//! 5. Seed the key binding store, from file when configured.
//! 6. Spawn background tasks: key binding refresh.
//! 7. Build the Axum router and start the HTTP server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use gateway::audit::TracingAuditSink;
use gateway::binding::{self, KeyBindingStore};
use gateway::config::{non_blank, Config, KmsBackend};
use gateway::decrypt::DecryptGateway;
use gateway::kms::{AwsKms, KmsClient, LocalKms};
use gateway::server::{self, state::AppState};
use gateway::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(non_blank(&cfg.otel_exporter_otlp_endpoint), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen_port = cfg.listen_port,
        deployment_target = %cfg.deployment_target,
        "decrypt-gateway starting"
    );

    // -----------------------------------------------------------------------
    // 3. Attestation
    // -----------------------------------------------------------------------
    let policy = cfg.attestation_policy()?;
    if policy.is_bypass() {
        warn!(
            deployment_target = %cfg.deployment_target,
            "attestation bypass active; documents are NOT verified"
        );
    }
    let source = cfg.attestation_source()?;

    // -----------------------------------------------------------------------
    // 4. KMS client
    // -----------------------------------------------------------------------
    let kms: Arc<dyn KmsClient> = match cfg.kms_backend {
        KmsBackend::Aws => Arc::new(AwsKms::init(non_blank(&cfg.kms_endpoint_url)).await?),
        KmsBackend::Local => {
            let keys = non_blank(&cfg.local_kms_keys).context("LOCAL_KMS_KEYS is required")?;
            warn!("using in-process development KMS");
            Arc::new(LocalKms::from_key_list(cfg.kms_key_id.trim(), keys)?)
        }
    };

    // -----------------------------------------------------------------------
    // 5. Key binding
    // -----------------------------------------------------------------------
    let binding_path = non_blank(&cfg.key_binding_path).map(PathBuf::from);
    let initial = match &binding_path {
        Some(path) => binding::load_from_file(path).await?,
        None => cfg.key_binding(),
    };
    info!(key_id = %initial.key_id, key_version = initial.active_version, "key binding loaded");
    let binding_store = KeyBindingStore::new(initial);

    // -----------------------------------------------------------------------
    // 6. Background tasks
    // -----------------------------------------------------------------------
    let _binding_refresh = binding_path.map(|path| {
        binding::refresh_task(
            path,
            Duration::from_secs(cfg.key_binding_refresh_secs),
            binding_store.clone(),
        )
    });

    // -----------------------------------------------------------------------
    // 7. HTTP server
    // -----------------------------------------------------------------------
    let gateway = DecryptGateway::new(
        policy,
        cfg.kms_measurements(),
        binding_store,
        kms,
        source,
        Arc::new(TracingAuditSink),
    );
    let router = server::router::build(AppState::new(gateway));

    let addr: std::net::SocketAddr = ([0, 0, 0, 0], cfg.listen_port).into();
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
