use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;

use super::cms::detached_signature;
use super::context::SigningContext;
use super::incremental::sign_incrementally;

/// One complete sign-and-timestamp pass over a document.
///
/// Implementations are sync: the PDF and CMS work is CPU-bound and the TSA
/// exchange uses a blocking client, so callers run them on the blocking pool.
/// Every call must start again from the file at `source` and keep no state
/// from earlier calls.
pub trait DocumentSigner: Send + Sync {
    /// Returns the full bytes of the signed document.
    fn sign(&self, source: &Path) -> Result<Vec<u8>>;
}

/// Signs PDFs with an invisible signature field and an RFC 3161 timestamp.
#[derive(Debug)]
pub struct PdfSigner {
    context: SigningContext,
}

impl PdfSigner {
    pub fn new(context: SigningContext) -> Self {
        Self { context }
    }
}

impl DocumentSigner for PdfSigner {
    fn sign(&self, source: &Path) -> Result<Vec<u8>> {
        let original = std::fs::read(source)
            .with_context(|| format!("reading {}", source.display()))?;

        sign_incrementally(&original, &self.context.metadata, Utc::now(), |covered| {
            detached_signature(
                &self.context.identity,
                covered,
                Some(&self.context.timestamp),
            )
        })
    }
}

/// Builds the signer for one request once the caller's bundle is open.
pub trait SignerFactory: Send + Sync {
    fn signer(&self, context: SigningContext) -> Arc<dyn DocumentSigner>;
}

/// Hands out [`PdfSigner`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfSignerFactory;

impl SignerFactory for PdfSignerFactory {
    fn signer(&self, context: SigningContext) -> Arc<dyn DocumentSigner> {
        Arc::new(PdfSigner::new(context))
    }
}
