//! Bounded exponential-backoff loop around [`DocumentSigner`].
//!
//! Attempts for one document run strictly one after another. Every failure,
//! including an attempt that panicked inside the PDF or CMS libraries, is
//! treated as transient; only the attempt budget ends the loop early.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use thiserror::Error;

use super::signer::DocumentSigner;
use crate::config::RetryPolicy;
use crate::events::SigningEvents;

/// Result of a single signing attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Carries the size of the stored document.
    Signed(u64),
    /// `retryable` is always set under the uniform policy; the loop still
    /// honours a terminal failure.
    Failed {
        cause: anyhow::Error,
        retryable: bool,
    },
}

/// The loop gave up; carries the number of attempts made and the last cause.
#[derive(Debug, Error)]
#[error("could not sign the document after {attempts} attempts: {cause:#}")]
pub struct SigningFailure {
    pub attempts: u32,
    pub cause: anyhow::Error,
}

/// A signed document already written to its destination.
#[derive(Debug)]
pub struct SignedDocument {
    pub path: PathBuf,
    pub len: u64,
    pub attempts: u32,
}

enum SignState {
    Attempting(u32),
    Succeeded { attempts: u32, len: u64 },
    FailedTerminal { attempts: u32, cause: anyhow::Error },
}

/// Backoff bookkeeping private to one run of the loop.
struct RetryState<'a> {
    policy: &'a RetryPolicy,
    delay: Duration,
}

impl<'a> RetryState<'a> {
    fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            policy,
            delay: policy.initial_delay,
        }
    }

    fn is_last(&self, attempt: u32) -> bool {
        attempt >= self.policy.max_attempts
    }

    /// Returns the delay to wait now and grows the next one.
    fn advance(&mut self) -> Duration {
        let current = self.delay;
        self.delay = self.policy.next_delay(current);
        current
    }
}

#[derive(Clone)]
pub struct RetryingSigner {
    signer: Arc<dyn DocumentSigner>,
    policy: RetryPolicy,
}

impl RetryingSigner {
    pub fn new(signer: Arc<dyn DocumentSigner>, policy: RetryPolicy) -> Self {
        Self { signer, policy }
    }

    /// Drives attempts until one succeeds or the policy is exhausted.
    ///
    /// Each attempt signs `source` afresh and writes the result to
    /// `destination`, so a failed write is retried like any other fault.
    pub async fn sign(
        &self,
        source: &Path,
        destination: &Path,
        events: &dyn SigningEvents,
    ) -> Result<SignedDocument, SigningFailure> {
        let mut retry = RetryState::new(&self.policy);
        let mut state = SignState::Attempting(1);

        loop {
            state = match state {
                SignState::Attempting(attempt) => {
                    events.attempt_started(attempt);
                    match self.attempt(source, destination).await {
                        AttemptOutcome::Signed(len) => SignState::Succeeded {
                            attempts: attempt,
                            len,
                        },
                        AttemptOutcome::Failed { cause, retryable }
                            if retryable && !retry.is_last(attempt) =>
                        {
                            let delay = retry.advance();
                            events.attempt_failed(attempt, &format!("{cause:#}"), Some(delay));
                            tokio::time::sleep(delay).await;
                            SignState::Attempting(attempt + 1)
                        }
                        AttemptOutcome::Failed { cause, .. } => {
                            events.attempt_failed(attempt, &format!("{cause:#}"), None);
                            SignState::FailedTerminal {
                                attempts: attempt,
                                cause,
                            }
                        }
                    }
                }
                SignState::Succeeded { attempts, len } => {
                    events.signing_succeeded(attempts, len);
                    return Ok(SignedDocument {
                        path: destination.to_path_buf(),
                        len,
                        attempts,
                    });
                }
                SignState::FailedTerminal { attempts, cause } => {
                    events.signing_exhausted(attempts, &format!("{cause:#}"));
                    return Err(SigningFailure { attempts, cause });
                }
            };
        }
    }

    async fn attempt(&self, source: &Path, destination: &Path) -> AttemptOutcome {
        let signer = Arc::clone(&self.signer);
        let source = source.to_path_buf();
        let destination = destination.to_path_buf();

        let task = tokio::task::spawn_blocking(move || {
            let signed = signer.sign(&source)?;
            std::fs::write(&destination, &signed)
                .with_context(|| format!("writing {}", destination.display()))?;
            anyhow::Ok(signed.len() as u64)
        });

        match task.await {
            Ok(Ok(len)) => AttemptOutcome::Signed(len),
            Ok(Err(cause)) => AttemptOutcome::Failed {
                cause,
                retryable: true,
            },
            Err(join_error) => AttemptOutcome::Failed {
                cause: aborted(join_error),
                retryable: true,
            },
        }
    }
}

fn aborted(join_error: tokio::task::JoinError) -> anyhow::Error {
    if !join_error.is_panic() {
        return anyhow!("signing attempt aborted: {join_error}");
    }
    let payload = join_error.into_panic();
    let detail = payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    anyhow!("signing attempt panicked: {detail}")
}
