use std::fmt;

use openssl::pkcs12::Pkcs12;
use thiserror::Error;
use x509_certificate::{CapturedX509Certificate, InMemorySigningKeyPair};
use zeroize::Zeroizing;

/// Reasons a certificate bundle cannot be turned into a signer.
///
/// Messages carry the library diagnostic only, never the passphrase.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("malformed PKCS#12 bundle: {0}")]
    Malformed(String),
    #[error("cannot decrypt bundle: {0}")]
    Decrypt(String),
    #[error("bundle contains no private key")]
    MissingKey,
    #[error("bundle contains no certificate")]
    MissingCertificate,
    #[error("unsupported key or certificate: {0}")]
    Unsupported(String),
}

/// Private key and certificate chain extracted from a PKCS#12 bundle.
pub struct SignerIdentity {
    key: InMemorySigningKeyPair,
    certificate: CapturedX509Certificate,
    chain: Vec<CapturedX509Certificate>,
}

impl SignerIdentity {
    /// Opens `bundle`. An empty passphrase means none was supplied.
    pub fn from_pkcs12(bundle: &[u8], passphrase: &str) -> Result<Self, BundleError> {
        let pkcs12 =
            Pkcs12::from_der(bundle).map_err(|e| BundleError::Malformed(e.to_string()))?;
        let parsed = pkcs12
            .parse2(passphrase)
            .map_err(|e| BundleError::Decrypt(e.to_string()))?;

        let pkey = parsed.pkey.ok_or(BundleError::MissingKey)?;
        let cert = parsed.cert.ok_or(BundleError::MissingCertificate)?;

        let key_der = Zeroizing::new(
            pkey.private_key_to_pkcs8()
                .map_err(|e| BundleError::Unsupported(e.to_string()))?,
        );
        let key = InMemorySigningKeyPair::from_pkcs8_der(key_der.as_slice())
            .map_err(|e| BundleError::Unsupported(e.to_string()))?;

        let certificate = captured(&cert)?;
        let chain = match parsed.ca {
            Some(stack) => stack
                .iter()
                .map(captured)
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            key,
            certificate,
            chain,
        })
    }

    pub(crate) fn key(&self) -> &InMemorySigningKeyPair {
        &self.key
    }

    pub fn certificate(&self) -> &CapturedX509Certificate {
        &self.certificate
    }

    /// Intermediate and root certificates shipped alongside the signing one.
    pub fn chain(&self) -> &[CapturedX509Certificate] {
        &self.chain
    }

    /// Subject common name, used as the signer's display name.
    pub fn common_name(&self) -> Option<String> {
        self.certificate.subject_common_name()
    }
}

impl fmt::Debug for SignerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerIdentity")
            .field("subject", &self.common_name())
            .field("chain_len", &self.chain.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

fn captured(cert: &openssl::x509::X509Ref) -> Result<CapturedX509Certificate, BundleError> {
    let der = cert
        .to_der()
        .map_err(|e| BundleError::Unsupported(e.to_string()))?;
    CapturedX509Certificate::from_der(der).map_err(|e| BundleError::Unsupported(e.to_string()))
}
