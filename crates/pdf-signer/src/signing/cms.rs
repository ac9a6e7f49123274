use anyhow::{Context, Result};
use cryptographic_message_syntax::{SignedDataBuilder, SignerBuilder};

use super::identity::SignerIdentity;
use super::timestamp::TimestampClient;

/// Builds a detached CMS `SignedData` over `content`.
///
/// When a timestamp authority is given, the signature value is sent to it and
/// the returned RFC 3161 token is stored as an unsigned attribute. That
/// network round trip happens synchronously inside this call.
pub fn detached_signature(
    identity: &SignerIdentity,
    content: &[u8],
    timestamp: Option<&TimestampClient>,
) -> Result<Vec<u8>> {
    let mut signer = SignerBuilder::new(identity.key(), identity.certificate().clone());
    if let Some(tsa) = timestamp {
        signer = signer
            .time_stamp_url(tsa.url().as_str())
            .context("configuring timestamp authority")?;
    }

    SignedDataBuilder::default()
        .content_external(content.to_vec())
        .signer(signer)
        .certificate(identity.certificate().clone())
        .certificates(identity.chain().iter().cloned())
        .build_der()
        .context("building CMS signature")
}
