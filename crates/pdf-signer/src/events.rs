use std::fmt;
use std::time::Duration;

use uuid::Uuid;

/// Correlation id assigned to every incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Notification sink for the signing pipeline.
///
/// Implementations must be safe to share between concurrently running
/// requests. Causes are passed pre-rendered; key material and passphrases
/// never reach this interface.
pub trait SigningEvents: Send + Sync {
    /// The request was accepted for signing.
    fn request_started(&self, path: &str);

    /// The request was refused before any signing attempt.
    fn request_rejected(&self, reason: &str);

    fn attempt_started(&self, attempt: u32);

    /// `retry_in` is `None` when no further attempt will follow.
    fn attempt_failed(&self, attempt: u32, cause: &str, retry_in: Option<Duration>);

    fn signing_exhausted(&self, attempts: u32, cause: &str);

    fn signing_succeeded(&self, attempts: u32, signed_len: u64);
}

/// Emits every event through `tracing`, tagged with the request id.
#[derive(Debug, Clone)]
pub struct TracingEvents {
    request_id: RequestId,
}

impl TracingEvents {
    pub fn new(request_id: RequestId) -> Self {
        Self { request_id }
    }
}

impl SigningEvents for TracingEvents {
    fn request_started(&self, path: &str) {
        tracing::info!(request_id = %self.request_id, path, "signing request received");
    }

    fn request_rejected(&self, reason: &str) {
        tracing::warn!(request_id = %self.request_id, reason, "signing request rejected");
    }

    fn attempt_started(&self, attempt: u32) {
        tracing::info!(request_id = %self.request_id, attempt, "signing attempt");
    }

    fn attempt_failed(&self, attempt: u32, cause: &str, retry_in: Option<Duration>) {
        tracing::warn!(
            request_id = %self.request_id,
            attempt,
            error = cause,
            retry_in_ms = retry_in.map(|delay| delay.as_millis() as u64),
            "signing attempt failed"
        );
    }

    fn signing_exhausted(&self, attempts: u32, cause: &str) {
        tracing::error!(
            request_id = %self.request_id,
            attempts,
            error = cause,
            "giving up on signing"
        );
    }

    fn signing_succeeded(&self, attempts: u32, signed_len: u64) {
        tracing::info!(
            request_id = %self.request_id,
            attempts,
            signed_len,
            "signing completed"
        );
    }
}
