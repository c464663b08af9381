//! Domain types shared across Shipwright crates.
//!
//! The desired-state descriptor is immutable once authored: every change
//! produces a new value with a new revision.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::image::ImageReference;

/// Boxed future used by the object-safe collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Name of an orchestrated service; the unit of serialization.
pub type ServiceName = String;

/// Monotonically increasing descriptor version.
pub type Revision = u64;

/// Pointer to a secret held by the external secret provider.
///
/// Never carries the secret value. The platform resolves it when a task
/// starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretReference {
    #[serde(rename = "secret")]
    pub name: String,
    #[serde(rename = "path")]
    pub provider_path: String,
}

/// Value bound to an environment variable inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvBinding {
    Literal(String),
    Secret(SecretReference),
}

/// Per-replica resource limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU in millicores (1024 = one vCPU on most platforms).
    pub cpu_millis: u32,
    pub memory_bytes: u64,
}

/// Network placement produced by the infrastructure collaborator.
///
/// Passed through to the platform verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkPlacement {
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub assign_public_ip: bool,
    /// Load balancer target group the replicas register with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_group: Option<String>,
}

/// Container-level health check forwarded to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub path: String,
    pub port: u16,
}

/// What should run for a service at a given revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredStateDescriptor {
    pub service_name: ServiceName,
    pub image: ImageReference,
    pub resources: ResourceLimits,
    #[serde(default)]
    pub env: BTreeMap<String, EnvBinding>,
    #[serde(default)]
    pub network: NetworkPlacement,
    pub replicas: u32,
    pub revision: Revision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
}

impl DesiredStateDescriptor {
    /// All secret references among the environment bindings.
    pub fn secret_references(&self) -> impl Iterator<Item = &SecretReference> {
        self.env.values().filter_map(|binding| match binding {
            EnvBinding::Secret(secret) => Some(secret),
            EnvBinding::Literal(_) => None,
        })
    }

    /// A copy of this descriptor re-tagged with `revision`.
    pub fn with_revision(&self, revision: Revision) -> Self {
        Self {
            revision,
            ..self.clone()
        }
    }
}

/// Maxima the target platform accepts for a single service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformLimits {
    pub max_cpu_millis: u32,
    pub max_memory_bytes: u64,
    pub max_replicas: u32,
}

impl Default for PlatformLimits {
    fn default() -> Self {
        Self {
            max_cpu_millis: 16 * 1024,
            max_memory_bytes: 120 * 1024 * 1024 * 1024,
            max_replicas: 100,
        }
    }
}
