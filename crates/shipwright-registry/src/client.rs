//! The registry client contract and its retrying wrapper.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use shipwright_core::{BoxFuture, Digest, ImageReference, RetryPolicy};
use tracing::warn;

use crate::builder::Artifact;
use crate::error::{RegistryError, RegistryResult};

/// Short-lived bearer credentials. The token never appears in `Debug` output.
#[derive(Clone, Default)]
pub struct Credentials {
    token: Option<String>,
}

impl Credentials {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Read the token from environment variable `var`; anonymous if unset.
    pub fn from_env(var: &str) -> Self {
        match std::env::var(var) {
            Ok(token) if !token.is_empty() => Self::bearer(token),
            _ => Self::anonymous(),
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = if self.token.is_some() { "bearer(<redacted>)" } else { "anonymous" };
        f.write_str(shown)
    }
}

/// A manifest as the registry served it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// The registry's content digest for the manifest.
    pub digest: Digest,
    pub bytes: Vec<u8>,
}

impl Manifest {
    /// A manifest identified by the digest of its own bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            digest: Digest::of(&bytes),
            bytes,
        }
    }
}

/// Content-addressed image transfer.
pub trait RegistryClient: Send + Sync {
    /// Upload an artifact into `repository` and tag it with `artifact.tag`.
    ///
    /// Blobs already present are skipped, so pushing identical content twice
    /// is a no-op. Returns a digest-pinned reference.
    fn push<'a>(
        &'a self,
        repository: &'a str,
        artifact: &'a Artifact,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, RegistryResult<ImageReference>>;

    /// Whether the referenced manifest exists.
    fn exists<'a>(&'a self, reference: &'a ImageReference) -> BoxFuture<'a, RegistryResult<bool>>;

    /// The manifest `reference` points at, with its content digest.
    fn pull_manifest<'a>(&'a self, reference: &'a ImageReference) -> BoxFuture<'a, RegistryResult<Manifest>>;
}

/// Wraps a client with bounded retries and a per-call timeout.
///
/// Only `Transfer` errors are retried; `Auth` surfaces immediately.
pub struct RetryingRegistry<R> {
    inner: R,
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl<R: RegistryClient> RetryingRegistry<R> {
    pub fn new(inner: R, policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            inner,
            policy,
            call_timeout,
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> RegistryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RegistryResult<T>>,
    {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let result = match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(RegistryError::Transfer(format!(
                    "{op} timed out after {:?}",
                    self.call_timeout
                ))),
            };

            match result {
                Err(e) if e.is_transient() && self.policy.allows_retry(attempts) => {
                    let delay = self.policy.backoff.jittered(attempts - 1);
                    warn!(
                        op,
                        attempt = attempts,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "registry call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

impl<R: RegistryClient> RegistryClient for RetryingRegistry<R> {
    fn push<'a>(
        &'a self,
        repository: &'a str,
        artifact: &'a Artifact,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, RegistryResult<ImageReference>> {
        Box::pin(self.with_retry("push", move || self.inner.push(repository, artifact, credentials)))
    }

    fn exists<'a>(&'a self, reference: &'a ImageReference) -> BoxFuture<'a, RegistryResult<bool>> {
        Box::pin(self.with_retry("exists", move || self.inner.exists(reference)))
    }

    fn pull_manifest<'a>(&'a self, reference: &'a ImageReference) -> BoxFuture<'a, RegistryResult<Manifest>> {
        Box::pin(self.with_retry("pull_manifest", move || self.inner.pull_manifest(reference)))
    }
}
