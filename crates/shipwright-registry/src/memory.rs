//! In-process registry used by tests and dry runs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use shipwright_core::{BoxFuture, Digest, ImageReference};
use tracing::debug;

use crate::builder::Artifact;
use crate::client::{Credentials, Manifest, RegistryClient};
use crate::error::{RegistryError, RegistryResult};

type FailureFactory = Box<dyn Fn() -> RegistryError + Send + Sync>;

/// Blobs keyed by digest, manifests keyed by `(repository, tag-or-digest)`.
pub struct InMemoryRegistry {
    name: String,
    required_token: Option<String>,
    blobs: Mutex<HashMap<Digest, Vec<u8>>>,
    manifests: Mutex<HashMap<(String, String), Vec<u8>>>,
    uploads: AtomicU32,
    calls: AtomicU32,
    failures: Mutex<Option<(u32, FailureFactory)>>,
}

impl InMemoryRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            required_token: None,
            blobs: Mutex::new(HashMap::new()),
            manifests: Mutex::new(HashMap::new()),
            uploads: AtomicU32::new(0),
            calls: AtomicU32::new(0),
            failures: Mutex::new(None),
        }
    }

    /// Reject pushes whose bearer token differs from `token`.
    pub fn with_required_token(mut self, token: &str) -> Self {
        self.required_token = Some(token.to_string());
        self
    }

    /// Make the next `count` calls fail with errors produced by `make`.
    pub fn fail_next(&self, count: u32, make: impl Fn() -> RegistryError + Send + Sync + 'static) {
        *lock(&self.failures) = Some((count, Box::new(make)));
    }

    /// Record a manifest for `reference` without uploading blobs.
    pub fn insert_manifest(&self, reference: &ImageReference, manifest: Vec<u8>) {
        lock(&self.manifests).insert(
            (reference.repository.clone(), reference.reference().to_string()),
            manifest,
        );
    }

    /// Blob uploads that actually stored new content.
    pub fn uploads(&self) -> u32 {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Every trait call, including failed ones.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn blob_count(&self) -> usize {
        lock(&self.blobs).len()
    }

    fn begin_call(&self) -> RegistryResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut failures = lock(&self.failures);
        if let Some((remaining, make)) = failures.as_mut() {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(make());
            }
        }
        Ok(())
    }

    fn push_now(&self, repository: &str, artifact: &Artifact, credentials: &Credentials) -> RegistryResult<ImageReference> {
        self.begin_call()?;
        if let Some(required) = &self.required_token {
            if credentials.token() != Some(required.as_str()) {
                return Err(RegistryError::Auth(format!("push to {repository} denied")));
            }
        }

        let mut blobs = lock(&self.blobs);
        for blob in artifact.blobs() {
            if blobs.contains_key(&blob.digest) {
                debug!(digest = %blob.digest, "blob already present");
                continue;
            }
            blobs.insert(blob.digest.clone(), blob.bytes.clone());
            self.uploads.fetch_add(1, Ordering::SeqCst);
        }
        drop(blobs);

        let mut manifests = lock(&self.manifests);
        for reference in [artifact.tag.as_str(), artifact.digest.as_str()] {
            manifests.insert(
                (repository.to_string(), reference.to_string()),
                artifact.manifest.clone(),
            );
        }

        Ok(ImageReference::by_digest(&self.name, repository, artifact.digest.clone()))
    }

    fn manifest(&self, reference: &ImageReference) -> Option<Vec<u8>> {
        lock(&self.manifests)
            .get(&(reference.repository.clone(), reference.reference().to_string()))
            .cloned()
    }
}

impl RegistryClient for InMemoryRegistry {
    fn push<'a>(
        &'a self,
        repository: &'a str,
        artifact: &'a Artifact,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, RegistryResult<ImageReference>> {
        Box::pin(async move { self.push_now(repository, artifact, credentials) })
    }

    fn exists<'a>(&'a self, reference: &'a ImageReference) -> BoxFuture<'a, RegistryResult<bool>> {
        Box::pin(async move {
            self.begin_call()?;
            Ok(self.manifest(reference).is_some())
        })
    }

    fn pull_manifest<'a>(&'a self, reference: &'a ImageReference) -> BoxFuture<'a, RegistryResult<Manifest>> {
        Box::pin(async move {
            self.begin_call()?;
            self.manifest(reference)
                .map(Manifest::from_bytes)
                .ok_or_else(|| RegistryError::NotFound(reference.to_string()))
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
