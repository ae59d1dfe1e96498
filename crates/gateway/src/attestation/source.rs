//! Where the current attestation document comes from.
//!
//! The trusted runtime refreshes its document out-of-band. [`FileSource`]
//! re-reads it once the cached raw document is older than the TTL; freshness
//! of the document itself is judged by the verifier against `issued_at`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use common::AttestationDocument;
use tracing::debug;

use super::AttestationError;

/// Supplies the attestation document for the current request.
#[async_trait]
pub trait AttestationSource: Send + Sync {
    /// Return the current document.
    ///
    /// # Errors
    ///
    /// Returns [`AttestationError::Unavailable`] if no document can be read.
    async fn fetch(&self) -> Result<AttestationDocument, AttestationError>;
}

/// Parse a JSON attestation document.
///
/// # Errors
///
/// Returns [`AttestationError::Unavailable`] on malformed JSON.
pub fn parse_document(raw: &[u8]) -> Result<AttestationDocument, AttestationError> {
    serde_json::from_slice(raw)
        .map_err(|e| AttestationError::Unavailable(format!("malformed attestation document: {e}")))
}

#[derive(Debug)]
struct CachedDocument {
    fetched_at: Instant,
    doc: AttestationDocument,
}

/// Reads the document from a file written by the trusted runtime.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    ttl: Duration,
    cache: ArcSwapOption<CachedDocument>,
}

impl FileSource {
    /// A `ttl` of zero disables caching of the raw document.
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
            cache: ArcSwapOption::empty(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AttestationSource for FileSource {
    async fn fetch(&self) -> Result<AttestationDocument, AttestationError> {
        if let Some(cached) = self.cache.load_full() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.doc.clone());
            }
        }

        let raw = tokio::fs::read(&self.path).await.map_err(|e| {
            AttestationError::Unavailable(format!(
                "failed to read attestation document {}: {e}",
                self.path.display()
            ))
        })?;
        let doc = parse_document(&raw)?;
        debug!(path = %self.path.display(), "attestation document re-read");

        self.cache.store(Some(Arc::new(CachedDocument {
            fetched_at: Instant::now(),
            doc: doc.clone(),
        })));
        Ok(doc)
    }
}

/// A fixed document supplied through configuration.
#[derive(Debug, Clone)]
pub struct InlineSource {
    doc: AttestationDocument,
}

impl InlineSource {
    pub fn new(doc: AttestationDocument) -> Self {
        Self { doc }
    }

    /// # Errors
    ///
    /// Returns [`AttestationError::Unavailable`] if `raw` is not a valid document.
    pub fn from_json(raw: &str) -> Result<Self, AttestationError> {
        parse_document(raw.as_bytes()).map(Self::new)
    }
}

#[async_trait]
impl AttestationSource for InlineSource {
    async fn fetch(&self) -> Result<AttestationDocument, AttestationError> {
        Ok(self.doc.clone())
    }
}
