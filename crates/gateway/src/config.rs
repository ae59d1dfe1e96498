//! Configuration loading and validation for the decrypt gateway.
//!
//! All values are read from environment variables at startup and validated
//! once. The process refuses to start on any invalid combination; nothing
//! here is re-read afterwards.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use common::{AttestationDocument, DeploymentTarget};
use serde::Deserialize;

use crate::attestation::{
    AttestationPolicy, AttestationSource, DevBypass, EnforcedPolicy, FileSource, InlineSource,
    MeasurementAllowlist,
};
use crate::binding::KeyBinding;

/// Which key-management backend serves decrypt calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KmsBackend {
    Aws,
    /// In-process keys; development only.
    Local,
}

/// Validated gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Where this process runs. Defaults to `production` so that a missing
    /// value never unlocks development behaviour.
    #[serde(default = "default_deployment_target")]
    pub deployment_target: DeploymentTarget,

    #[serde(default = "default_true")]
    pub require_attestation: bool,

    /// Runtime identity every attestation document must carry.
    #[serde(default)]
    pub expected_runtime: String,

    /// Comma-separated accepted measurements.
    #[serde(default)]
    pub allowed_measurements: String,

    /// File the trusted runtime writes its attestation document to.
    pub attestation_doc_path: Option<String>,

    /// Attestation document JSON supplied directly.
    pub attestation_doc_inline: Option<String>,

    /// Base64 Ed25519 public key of the attestation signer.
    pub attestation_public_key: Option<String>,

    #[serde(default = "default_max_age")]
    pub attestation_max_age_seconds: u64,

    /// How long a fetched raw document may be reused before re-reading.
    #[serde(default = "default_cache_ttl")]
    pub attestation_cache_ttl_secs: u64,

    #[serde(default)]
    pub allow_insecure_dev: bool,

    /// Key identifier secrets are encrypted under. **Required.**
    pub kms_key_id: String,

    /// Active key version at startup. **Required.**
    pub key_version: u32,

    /// Comma-separated measurements the KMS key may be used from.
    /// Defaults to `allowed_measurements`.
    pub kms_allowed_measurements: Option<String>,

    #[serde(default = "default_kms_backend")]
    pub kms_backend: KmsBackend,

    pub kms_endpoint_url: Option<String>,

    /// `<version>:<base64 key>` list for the local backend.
    pub local_kms_keys: Option<String>,

    /// JSON file holding the active binding, rewritten by rotation.
    pub key_binding_path: Option<String>,

    #[serde(default = "default_binding_refresh")]
    pub key_binding_refresh_secs: u64,

    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    pub otel_exporter_otlp_endpoint: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_deployment_target() -> DeploymentTarget {
    DeploymentTarget::Production
}
fn default_true() -> bool {
    true
}
fn default_max_age() -> u64 {
    300
}
fn default_cache_ttl() -> u64 {
    5
}
fn default_kms_backend() -> KmsBackend {
    KmsBackend::Aws
}
fn default_binding_refresh() -> u64 {
    30
}
fn default_listen_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent, cannot be parsed,
    /// or the combination is unsafe.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Whether the development bypass is requested (and therefore allowed to
    /// be attempted). Anything else enforces attestation.
    pub fn wants_bypass(&self) -> bool {
        !self.require_attestation && self.allow_insecure_dev
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.kms_key_id, "KMS_KEY_ID")?;
        if self.key_version == 0 {
            anyhow::bail!("KEY_VERSION must be > 0");
        }
        if self.key_binding_refresh_secs == 0 {
            anyhow::bail!("KEY_BINDING_REFRESH_SECS must be > 0");
        }

        if self.allow_insecure_dev && self.deployment_target.is_production() {
            anyhow::bail!("ALLOW_INSECURE_DEV must not be set when DEPLOYMENT_TARGET=production");
        }

        match self.kms_backend {
            KmsBackend::Local => {
                if self.deployment_target != DeploymentTarget::Development {
                    anyhow::bail!("KMS_BACKEND=local is only permitted when DEPLOYMENT_TARGET=development");
                }
                if non_blank(&self.local_kms_keys).is_none() {
                    anyhow::bail!("LOCAL_KMS_KEYS is required when KMS_BACKEND=local");
                }
            }
            KmsBackend::Aws => {}
        }

        if !self.wants_bypass() {
            if non_blank(&self.attestation_doc_path).is_none()
                && non_blank(&self.attestation_doc_inline).is_none()
            {
                anyhow::bail!(
                    "attestation is enforced: ATTESTATION_DOC_PATH (or ATTESTATION_DOC_INLINE) is required"
                );
            }
            ensure_non_empty(&self.expected_runtime, "EXPECTED_RUNTIME")?;
            if non_blank(&self.attestation_public_key).is_none() {
                anyhow::bail!("ATTESTATION_PUBLIC_KEY is required when attestation is enforced");
            }
            if MeasurementAllowlist::parse_csv(&self.allowed_measurements).is_empty() {
                anyhow::bail!("ALLOWED_MEASUREMENTS must list at least one measurement");
            }
            if self.attestation_max_age_seconds == 0 {
                anyhow::bail!("ATTESTATION_MAX_AGE_SECONDS must be > 0");
            }
        }
        Ok(())
    }

    /// Build the attestation policy this process enforces.
    ///
    /// # Errors
    ///
    /// Returns an error if the public key is malformed or the bypass is
    /// refused for the deployment target.
    pub fn attestation_policy(&self) -> Result<AttestationPolicy> {
        if self.wants_bypass() {
            let bypass = DevBypass::for_target(self.deployment_target)?;
            return Ok(AttestationPolicy::DevBypass(bypass));
        }

        let key_b64 = non_blank(&self.attestation_public_key)
            .context("ATTESTATION_PUBLIC_KEY is required when attestation is enforced")?;
        let key = STANDARD
            .decode(key_b64)
            .context("ATTESTATION_PUBLIC_KEY is not valid base64")?;
        let policy = EnforcedPolicy::new(
            &key,
            self.expected_runtime.trim(),
            MeasurementAllowlist::parse_csv(&self.allowed_measurements),
            self.attestation_max_age_seconds,
        )?;
        Ok(AttestationPolicy::Enforced(policy))
    }

    /// Build the attestation document source.
    ///
    /// Under the development bypass with no configured source an unsigned
    /// placeholder document is served; the bypass policy accepts it.
    ///
    /// # Errors
    ///
    /// Returns an error if an inline document is malformed.
    pub fn attestation_source(&self) -> Result<Arc<dyn AttestationSource>> {
        if let Some(path) = non_blank(&self.attestation_doc_path) {
            return Ok(Arc::new(FileSource::new(
                path,
                Duration::from_secs(self.attestation_cache_ttl_secs),
            )));
        }
        if let Some(inline) = non_blank(&self.attestation_doc_inline) {
            return Ok(Arc::new(
                InlineSource::from_json(inline).context("ATTESTATION_DOC_INLINE is invalid")?,
            ));
        }
        if self.wants_bypass() {
            return Ok(Arc::new(InlineSource::new(AttestationDocument {
                runtime: "insecure-dev".into(),
                measurement: String::new(),
                issued_at: Utc::now(),
                signature: Vec::new(),
            })));
        }
        anyhow::bail!("no attestation document source configured")
    }

    /// Measurements the KMS key may be used from.
    pub fn kms_measurements(&self) -> MeasurementAllowlist {
        match non_blank(&self.kms_allowed_measurements) {
            Some(list) => MeasurementAllowlist::parse_csv(list),
            None => MeasurementAllowlist::parse_csv(&self.allowed_measurements),
        }
    }

    /// Initial key binding.
    pub fn key_binding(&self) -> KeyBinding {
        KeyBinding::new(self.kms_key_id.trim(), self.key_version)
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}

/// `Some(trimmed)` unless the option is absent or blank.
pub fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
