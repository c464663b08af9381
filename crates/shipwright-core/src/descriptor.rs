//! Descriptor file parser.
//!
//! A descriptor file is the authored, on-disk form of a
//! [`DesiredStateDescriptor`]:
//!
//! ```toml
//! [service]
//! name = "bookstore-api"
//! revision = 3
//! replicas = 2
//! image = "registry.example.com/bookstore-api@sha256:…"
//!
//! [resources]
//! cpu = 512
//! memory = "1Gi"
//!
//! [env]
//! ENVIRONMENT = "production"
//! DATABASE_URL = { secret = "DATABASE_URL", path = "ssm:/bookstore/database-url" }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::image::ImageReference;
use crate::types::{
    DesiredStateDescriptor, EnvBinding, HealthCheck, NetworkPlacement, ResourceLimits, Revision,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorFile {
    pub service: ServiceSection,
    pub resources: Option<ResourcesSection>,
    pub env: Option<BTreeMap<String, EnvBinding>>,
    pub network: Option<NetworkPlacement>,
    pub health: Option<HealthCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSection {
    pub name: Option<String>,
    pub revision: Revision,
    pub replicas: Option<u32>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesSection {
    /// Millicores.
    pub cpu: Option<u32>,
    /// Bytes, or a string such as "512Mi", "1Gi", "256M".
    pub memory: Option<Quantity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Bytes(u64),
    Text(String),
}

/// Values supplied on the command line that win over the file.
#[derive(Debug, Clone, Default)]
pub struct DescriptorOverrides {
    pub service_name: Option<String>,
    pub image: Option<String>,
}

const DEFAULT_CPU_MILLIS: u32 = 256;
const DEFAULT_MEMORY_BYTES: u64 = 512 * 1024 * 1024;

impl DescriptorFile {
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| CoreError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn to_toml_string(&self) -> CoreResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Resolve into an immutable descriptor.
    ///
    /// Unqualified image references use `default_registry`. Replica count
    /// defaults to 1; range checks happen at validation time, not here.
    pub fn into_descriptor(
        self,
        overrides: &DescriptorOverrides,
        default_registry: &str,
    ) -> CoreResult<DesiredStateDescriptor> {
        let service_name = overrides
            .service_name
            .clone()
            .or(self.service.name)
            .ok_or(CoreError::MissingField("service.name"))?;
        let image_text = overrides
            .image
            .clone()
            .or(self.service.image)
            .ok_or(CoreError::MissingField("service.image"))?;
        let image = ImageReference::parse_with_registry(&image_text, default_registry)?;

        let resources = match self.resources {
            Some(section) => ResourceLimits {
                cpu_millis: section.cpu.unwrap_or(DEFAULT_CPU_MILLIS),
                memory_bytes: match section.memory {
                    Some(q) => q.to_bytes()?,
                    None => DEFAULT_MEMORY_BYTES,
                },
            },
            None => ResourceLimits {
                cpu_millis: DEFAULT_CPU_MILLIS,
                memory_bytes: DEFAULT_MEMORY_BYTES,
            },
        };

        Ok(DesiredStateDescriptor {
            service_name,
            image,
            resources,
            env: self.env.unwrap_or_default(),
            network: self.network.unwrap_or_default(),
            replicas: self.service.replicas.unwrap_or(1),
            revision: self.service.revision,
            health_check: self.health,
        })
    }

    /// A minimal descriptor file for `service`.
    pub fn scaffold(service: &str) -> Self {
        let mut env = BTreeMap::new();
        env.insert(
            "ENVIRONMENT".to_string(),
            EnvBinding::Literal("production".to_string()),
        );
        DescriptorFile {
            service: ServiceSection {
                name: Some(service.to_string()),
                revision: 1,
                replicas: Some(2),
                image: Some(format!("{service}:latest")),
            },
            resources: Some(ResourcesSection {
                cpu: Some(DEFAULT_CPU_MILLIS),
                memory: Some(Quantity::Text("512Mi".to_string())),
            }),
            env: Some(env),
            network: None,
            health: Some(HealthCheck {
                path: "/health".to_string(),
                port: 8000,
            }),
        }
    }
}

impl Quantity {
    pub fn to_bytes(&self) -> CoreResult<u64> {
        match self {
            Quantity::Bytes(b) => Ok(*b),
            Quantity::Text(s) => parse_memory(s).ok_or_else(|| CoreError::InvalidQuantity(s.clone())),
        }
    }
}

/// Parse "512Mi", "1Gi", "256M", "2G", "1024Ki", or plain bytes.
fn parse_memory(s: &str) -> Option<u64> {
    let s = s.trim();
    let units: [(&str, u64); 6] = [
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("K", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
    ];
    for (suffix, factor) in units {
        if let Some(n) = s.strip_suffix(suffix) {
            return n.trim().parse::<u64>().ok()?.checked_mul(factor);
        }
    }
    s.parse::<u64>().ok()
}
