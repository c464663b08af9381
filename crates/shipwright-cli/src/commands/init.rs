use std::path::Path;

use anyhow::{bail, Context};
use shipwright_core::{is_valid_repository, DescriptorFile};

pub fn init(service: &str, out: &Path, force: bool) -> anyhow::Result<()> {
    if !is_valid_repository(service) {
        bail!("{service:?} is not a valid service name");
    }
    if out.exists() && !force {
        bail!("{} already exists (use --force to replace it)", out.display());
    }

    let scaffold = DescriptorFile::scaffold(service).to_toml_string()?;
    std::fs::write(out, scaffold).with_context(|| format!("writing {}", out.display()))?;
    println!("✓ Generated {}", out.display());
    Ok(())
}
