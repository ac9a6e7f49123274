use url::Url;

use super::identity::{BundleError, SignerIdentity};
use super::timestamp::TimestampClient;

pub const SIGNATURE_FIELD_NAME: &str = "Signature";
pub const SIGNATURE_REASON: &str = "Signed with attached certificate";

/// Descriptive entries written into the signature dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureMetadata {
    pub field_name: String,
    pub reason: String,
    /// Signer display name (`/Name`), taken from the certificate subject.
    pub signer_name: Option<String>,
}

impl SignatureMetadata {
    pub fn for_signer(signer_name: Option<String>) -> Self {
        Self {
            field_name: SIGNATURE_FIELD_NAME.to_string(),
            reason: SIGNATURE_REASON.to_string(),
            signer_name,
        }
    }
}

/// Everything a signing attempt needs, built once per request.
#[derive(Debug)]
pub struct SigningContext {
    pub identity: SignerIdentity,
    pub metadata: SignatureMetadata,
    pub timestamp: TimestampClient,
}

impl SigningContext {
    /// Opens the certificate bundle and prepares metadata and TSA client.
    ///
    /// Any error here is the caller's fault: the bundle or its passphrase is
    /// bad, and retrying cannot help.
    pub fn build(bundle: &[u8], passphrase: &str, tsa_url: &Url) -> Result<Self, BundleError> {
        let identity = SignerIdentity::from_pkcs12(bundle, passphrase)?;
        let metadata = SignatureMetadata::for_signer(identity.common_name());
        Ok(Self {
            identity,
            metadata,
            timestamp: TimestampClient::new(tsa_url.clone()),
        })
    }
}
