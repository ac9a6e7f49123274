use url::Url;

/// Handle on an RFC 3161 timestamp authority.
///
/// Holds no per-request state; the request/response exchange itself is
/// driven by the CMS builder while the signature is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampClient {
    url: Url,
}

impl TimestampClient {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}
