mod cms;
mod context;
mod identity;
mod incremental;
mod pdf_object;
mod retry;
mod signer;
mod timestamp;

pub use cms::detached_signature;
pub use context::{SIGNATURE_FIELD_NAME, SIGNATURE_REASON, SignatureMetadata, SigningContext};
pub use identity::{BundleError, SignerIdentity};
pub use incremental::{SIGNATURE_CAPACITY, sign_incrementally};
pub use retry::{AttemptOutcome, RetryingSigner, SignedDocument, SigningFailure};
pub use signer::{DocumentSigner, PdfSigner, PdfSignerFactory, SignerFactory};
pub use timestamp::TimestampClient;
