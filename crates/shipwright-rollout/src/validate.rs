//! Pre-submission descriptor validation.
//!
//! Every check runs and every problem is reported; a descriptor with any
//! problem never reaches the platform.

use std::sync::LazyLock;

use regex::Regex;
use shipwright_core::{DesiredStateDescriptor, Digest, PlatformLimits, Revision};
use shipwright_platform::SecretProvider;
use shipwright_registry::{RegistryClient, RegistryError};
use tracing::debug;

static DNS_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?$").expect("label pattern is valid"));

/// Collaborators and limits a descriptor is checked against.
pub struct Validator<'a> {
    pub registry: &'a dyn RegistryClient,
    pub secrets: &'a dyn SecretProvider,
    pub limits: &'a PlatformLimits,
}

impl Validator<'_> {
    /// Validate `descriptor`; on success return it with the image pinned to
    /// a digest.
    ///
    /// `submitted` is the descriptor already sent to the platform at the
    /// service's highest revision. A lower revision is rejected, and so is
    /// the same revision with different content.
    pub async fn validate(
        &self,
        descriptor: &DesiredStateDescriptor,
        submitted: Option<&DesiredStateDescriptor>,
    ) -> Result<DesiredStateDescriptor, Vec<String>> {
        let mut problems = check_static(descriptor, self.limits, submitted.map(|d| d.revision));

        let pinned = match self.resolve_image(descriptor).await {
            Ok(digest) => Some(descriptor.image.pinned(digest)),
            Err(problem) => {
                problems.push(problem);
                None
            }
        };

        for secret in descriptor.secret_references() {
            match self.secrets.exists(secret).await {
                Ok(true) => {}
                Ok(false) => problems.push(format!(
                    "secret {} ({}) is not known to the secret provider",
                    secret.name, secret.provider_path
                )),
                Err(e) => problems.push(format!("secret {} could not be checked: {e}", secret.name)),
            }
        }

        let pinned = pinned.map(|image| DesiredStateDescriptor {
            image,
            ..descriptor.clone()
        });
        if let (Some(candidate), Some(previous)) = (&pinned, submitted) {
            if candidate.revision == previous.revision && candidate != previous {
                problems.push(format!(
                    "revision {} was already submitted with different content; use a new revision",
                    candidate.revision
                ));
            }
        }

        match pinned {
            Some(candidate) if problems.is_empty() => Ok(candidate),
            _ => Err(problems),
        }
    }

    /// A pinned image must exist; a tagged one is resolved to its digest.
    async fn resolve_image(&self, descriptor: &DesiredStateDescriptor) -> Result<Digest, String> {
        let image = &descriptor.image;
        if let Some(digest) = image.digest() {
            return match self.registry.exists(image).await {
                Ok(true) => Ok(digest.clone()),
                Ok(false) => Err(format!("image {image} does not exist in the registry")),
                Err(e) => Err(format!("image {image} could not be resolved: {e}")),
            };
        }

        match self.registry.pull_manifest(image).await {
            Ok(manifest) => {
                debug!(%image, digest = %manifest.digest, "resolved tag to digest");
                Ok(manifest.digest)
            }
            Err(RegistryError::NotFound(_)) => Err(format!("image {image} does not exist in the registry")),
            Err(e) => Err(format!("image {image} could not be resolved: {e}")),
        }
    }
}

/// Checks that need no remote calls.
fn check_static(
    descriptor: &DesiredStateDescriptor,
    limits: &PlatformLimits,
    highest_submitted: Option<Revision>,
) -> Vec<String> {
    let mut problems = Vec::new();

    if descriptor.service_name.is_empty() {
        problems.push("service name is empty".to_string());
    } else if !DNS_LABEL.is_match(&descriptor.service_name) {
        problems.push(format!(
            "service name {:?} must be a DNS label (lowercase alphanumerics and '-', at most 63 chars)",
            descriptor.service_name
        ));
    }

    if descriptor.replicas == 0 {
        problems.push("replica count must be greater than zero".to_string());
    } else if descriptor.replicas > limits.max_replicas {
        problems.push(format!(
            "replica count {} exceeds platform maximum {}",
            descriptor.replicas, limits.max_replicas
        ));
    }

    let resources = &descriptor.resources;
    if resources.cpu_millis == 0 {
        problems.push("cpu must be greater than zero".to_string());
    } else if resources.cpu_millis > limits.max_cpu_millis {
        problems.push(format!(
            "cpu {}m exceeds platform maximum {}m",
            resources.cpu_millis, limits.max_cpu_millis
        ));
    }
    if resources.memory_bytes == 0 {
        problems.push("memory must be greater than zero".to_string());
    } else if resources.memory_bytes > limits.max_memory_bytes {
        problems.push(format!(
            "memory {} bytes exceeds platform maximum {} bytes",
            resources.memory_bytes, limits.max_memory_bytes
        ));
    }

    if let Some(highest) = highest_submitted {
        if descriptor.revision < highest {
            problems.push(format!(
                "revision {} is lower than already submitted revision {highest}",
                descriptor.revision
            ));
        }
    }

    for key in descriptor.env.keys() {
        if key.is_empty() {
            problems.push("environment variable name is empty".to_string());
        } else if key.contains('=') || key.contains('\0') {
            problems.push(format!("environment variable name {key:?} is invalid"));
        }
    }

    problems
}
