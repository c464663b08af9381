//! `shipwright build` and `shipwright push`.

use std::path::Path;

use anyhow::Context;
use shipwright_registry::{
    Artifact, ArtifactBuilder, Credentials, OciRegistry, RegistryClient, RegistryError, RetryingRegistry,
};
use tracing::info;

use super::{Settings, EXIT_UNAUTHORIZED};

pub fn build(context: &Path, name: &str, version: &str, out: Option<&Path>) -> anyhow::Result<()> {
    let artifact = ArtifactBuilder::new().build(context, name, version)?;
    print_artifact(&artifact);

    if let Some(out) = out {
        std::fs::write(out, &artifact.manifest).with_context(|| format!("writing {}", out.display()))?;
        println!("  Manifest: {}", out.display());
    }
    Ok(())
}

/// Returns the process exit code.
pub async fn push(settings: &Settings, context: &Path, name: &str, version: &str) -> anyhow::Result<u8> {
    let artifact = ArtifactBuilder::new().build(context, name, version)?;
    print_artifact(&artifact);

    let config = &settings.config;
    let credentials = Credentials::from_env(&config.registry.token_env);
    let registry = RetryingRegistry::new(
        OciRegistry::new(&config.registry.endpoint, credentials.clone()),
        config.retry_policy()?,
        config.registry_timeout()?,
    );

    match registry.push(name, &artifact, &credentials).await {
        Ok(reference) => {
            info!(%reference, "pushed");
            println!("✓ Pushed {reference}");
            Ok(0)
        }
        Err(RegistryError::Auth(message)) => {
            eprintln!("Push failed: registry refused credentials: {message}");
            Ok(EXIT_UNAUTHORIZED)
        }
        Err(e) => Err(e).context("push failed"),
    }
}

fn print_artifact(artifact: &Artifact) {
    let bytes: u64 = artifact.blobs().map(|b| b.size()).sum();
    println!("✓ Built {} {} ({:.1} KB)", artifact.name, artifact.version, bytes as f64 / 1024.0);
    println!("  Tag:    {}", artifact.tag);
    println!("  Digest: {}", artifact.digest);
}
