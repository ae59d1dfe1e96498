//! AWS KMS implementation of [`KmsClient`].

use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_kms::error::{DisplayErrorContext, SdkError};
use aws_sdk_kms::primitives::Blob;

use super::{KmsClient, KmsDecryptRequest, KmsError, Plaintext};

/// Encryption-context key that pins a ciphertext to its key version.
pub const KEY_VERSION_CONTEXT: &str = "key_version";

/// KMS client configured from the standard AWS credential chain.
#[derive(Clone, Debug)]
pub struct AwsKms {
    client: aws_sdk_kms::Client,
}

impl AwsKms {
    /// Initialise the SDK client.
    ///
    /// When `endpoint_url` is set, KMS calls are sent there instead of the
    /// regional endpoint (e.g. a local proxy in front of the real service).
    ///
    /// # Errors
    ///
    /// Returns an error if the SDK config cannot be loaded.
    pub async fn init(endpoint_url: Option<&str>) -> Result<Self> {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;

        let mut builder = aws_sdk_kms::config::Builder::from(&config);
        if let Some(url) = endpoint_url {
            builder = builder.endpoint_url(url);
        }

        Ok(Self {
            client: aws_sdk_kms::Client::from_conf(builder.build()),
        })
    }
}

#[async_trait]
impl KmsClient for AwsKms {
    async fn decrypt(&self, request: KmsDecryptRequest) -> Result<Plaintext, KmsError> {
        let resp = self
            .client
            .decrypt()
            .key_id(&request.key_id)
            .ciphertext_blob(Blob::new(request.ciphertext.to_vec()))
            .encryption_context(KEY_VERSION_CONTEXT, request.key_version.to_string())
            .send()
            .await
            .map_err(|e| {
                let detail = DisplayErrorContext(&e).to_string();
                match e {
                    SdkError::ServiceError(_) => KmsError::Unauthorized(detail),
                    _ => KmsError::Transport(detail),
                }
            })?;

        let plaintext = resp.plaintext().ok_or(KmsError::EmptyPlaintext)?;
        if plaintext.as_ref().is_empty() {
            return Err(KmsError::EmptyPlaintext);
        }
        Ok(Plaintext::new(plaintext.as_ref().to_vec()))
    }
}
