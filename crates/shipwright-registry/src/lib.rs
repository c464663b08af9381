//! shipwright-registry: artifact builds and registry transfer.
//!
//! ```text
//! context dir ──► ArtifactBuilder ──► Artifact { blobs, manifest, digest, tag }
//!                                          │
//!                         RetryingRegistry<OciRegistry>::push
//!                                          │
//!                               registry (content-addressed)
//! ```
//!
//! [`RegistryClient`] is the seam the orchestrator validates images through;
//! [`InMemoryRegistry`] stands in for a real registry in tests.

pub mod builder;
pub mod client;
pub mod error;
pub mod memory;
pub mod oci;

pub use builder::{Artifact, ArtifactBuilder, Blob};
pub use client::{Credentials, Manifest, RegistryClient, RetryingRegistry};
pub use error::{BuildError, RegistryError, RegistryResult};
pub use memory::InMemoryRegistry;
pub use oci::OciRegistry;
