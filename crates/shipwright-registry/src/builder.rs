//! Deterministic, content-addressed artifact builds.
//!
//! Pipeline:
//! 1. Walk the build context in sorted order, skipping `.git/`, `target/`
//!    and every prefix listed in `.shipwrightignore`
//! 2. Pack the files into one uncompressed layer blob (no timestamps)
//! 3. Write a config blob and a manifest referencing both by digest
//! 4. The manifest digest is the image digest; tag `<version>-<short digest>`

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use shipwright_core::{Digest, is_valid_repository};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::BuildError;

pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.shipwright.config.v1+json";
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.shipwright.layer.v1";

/// Name of the ignore file read from the context root.
pub const IGNORE_FILE: &str = ".shipwrightignore";

const ALWAYS_IGNORED: &[&str] = &[".git", "target"];

/// A content-addressed blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub digest: Digest,
    pub media_type: &'static str,
    pub bytes: Vec<u8>,
}

impl Blob {
    fn new(media_type: &'static str, bytes: Vec<u8>) -> Self {
        Self {
            digest: Digest::of(&bytes),
            media_type,
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// A built image, ready to push.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub version: semver::Version,
    /// Deterministic tag: `<version>-<first 12 hex of digest>`.
    pub tag: String,
    /// Image digest (digest of the manifest bytes).
    pub digest: Digest,
    pub config: Blob,
    pub layers: Vec<Blob>,
    pub manifest: Vec<u8>,
}

impl Artifact {
    /// Config followed by layers; the order blobs must be uploaded in.
    pub fn blobs(&self) -> impl Iterator<Item = &Blob> {
        std::iter::once(&self.config).chain(self.layers.iter())
    }
}

/// Builds artifacts from a directory on disk.
#[derive(Debug, Default)]
pub struct ArtifactBuilder {
    extra_ignores: Vec<String>,
}

impl ArtifactBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip paths under `prefix` in addition to the ignore file.
    pub fn ignore(mut self, prefix: impl Into<String>) -> Self {
        self.extra_ignores.push(prefix.into());
        self
    }

    pub fn build(&self, context_dir: &Path, name: &str, version: &str) -> Result<Artifact, BuildError> {
        if !is_valid_repository(name) {
            return Err(BuildError::InvalidName(name.to_string()));
        }
        let version = semver::Version::parse(version).map_err(|source| BuildError::InvalidVersion {
            version: version.to_string(),
            source,
        })?;

        let mut ignores = read_ignore_file(context_dir)?;
        ignores.extend(self.extra_ignores.iter().cloned());

        let files = collect_files(context_dir, &ignores)?;
        if files.is_empty() {
            return Err(BuildError::EmptyContext(context_dir.to_path_buf()));
        }

        let mut layer = Vec::new();
        for (relative, path) in &files {
            append_entry(&mut layer, relative, path)?;
        }
        let layer = Blob::new(LAYER_MEDIA_TYPE, layer);
        debug!(files = files.len(), digest = %layer.digest, "packed layer");

        let config = json!({
            "name": name,
            "version": version.to_string(),
            "layers": [layer.digest.as_str()],
        });
        let config = Blob::new(CONFIG_MEDIA_TYPE, serde_json::to_vec(&config)?);

        let manifest = json!({
            "schemaVersion": 2,
            "mediaType": MANIFEST_MEDIA_TYPE,
            "config": descriptor_json(&config),
            "layers": [descriptor_json(&layer)],
            "annotations": {
                "org.opencontainers.image.title": name,
                "org.opencontainers.image.version": version.to_string(),
            },
        });
        let manifest = serde_json::to_vec(&manifest)?;
        let digest = Digest::of(&manifest);
        let tag = format!("{version}-{}", digest.short());

        info!(%name, %tag, %digest, "built artifact");

        Ok(Artifact {
            name: name.to_string(),
            version,
            tag,
            digest,
            config,
            layers: vec![layer],
            manifest,
        })
    }
}

fn descriptor_json(blob: &Blob) -> serde_json::Value {
    json!({
        "mediaType": blob.media_type,
        "digest": blob.digest.as_str(),
        "size": blob.size(),
    })
}

/// Read `.shipwrightignore`: one literal path prefix per line, `#` comments.
fn read_ignore_file(context_dir: &Path) -> Result<Vec<String>, BuildError> {
    let path = context_dir.join(IGNORE_FILE);
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(&path).map_err(|source| BuildError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.trim_start_matches("./").trim_end_matches('/').to_string())
        .collect())
}

fn is_ignored(relative: &str, ignores: &[String]) -> bool {
    ALWAYS_IGNORED.iter().any(|p| under_prefix(relative, p))
        || ignores.iter().any(|p| under_prefix(relative, p))
}

fn under_prefix(relative: &str, prefix: &str) -> bool {
    relative == prefix || relative.starts_with(&format!("{prefix}/"))
}

/// Regular files under `context_dir`, sorted by relative path.
fn collect_files(context_dir: &Path, ignores: &[String]) -> Result<Vec<(String, PathBuf)>, BuildError> {
    let mut files = Vec::new();
    let walker = WalkDir::new(context_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let relative = relative_path(context_dir, entry.path());
            relative.is_empty() || !is_ignored(&relative, ignores)
        });

    for entry in walker {
        let entry = entry.map_err(|e| BuildError::Io {
            path: e.path().map(Path::to_path_buf).unwrap_or_else(|| context_dir.to_path_buf()),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = relative_path(context_dir, entry.path());
        if relative == IGNORE_FILE {
            continue;
        }
        files.push((relative, entry.into_path()));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// `<path>\0<mode>\0<len>\n` followed by the file bytes.
fn append_entry(layer: &mut Vec<u8>, relative: &str, path: &Path) -> Result<(), BuildError> {
    let io_err = |source| BuildError::Io {
        path: path.to_path_buf(),
        source,
    };
    let bytes = fs::read(path).map_err(io_err)?;
    let mode = file_mode(path).map_err(io_err)?;
    layer.extend_from_slice(format!("{relative}\0{mode:o}\0{}\n", bytes.len()).as_bytes());
    layer.extend_from_slice(&bytes);
    Ok(())
}

#[cfg(unix)]
fn file_mode(path: &Path) -> std::io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::metadata(path)?.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> std::io::Result<u32> {
    Ok(0o644)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn context(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            let full = dir.path().join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(full, content).unwrap();
        }
        dir
    }

    #[test]
    fn identical_content_yields_identical_digest() {
        let a = context(&[("app.py", "print('hi')"), ("static/index.html", "<html/>")]);
        let b = context(&[("static/index.html", "<html/>"), ("app.py", "print('hi')")]);

        let builder = ArtifactBuilder::new();
        let first = builder.build(a.path(), "bookstore/api", "1.2.0").unwrap();
        let second = builder.build(b.path(), "bookstore/api", "1.2.0").unwrap();

        assert_eq!(first.digest, second.digest);
        assert_eq!(first.tag, second.tag);
        assert_eq!(first.tag, format!("1.2.0-{}", first.digest.short()));
    }

    #[test]
    fn content_change_changes_digest() {
        let a = context(&[("app.py", "v1")]);
        let b = context(&[("app.py", "v2")]);
        let builder = ArtifactBuilder::new();
        let first = builder.build(a.path(), "api", "1.0.0").unwrap();
        let second = builder.build(b.path(), "api", "1.0.0").unwrap();
        assert_ne!(first.digest, second.digest);
    }

    #[test]
    fn ignored_paths_do_not_affect_digest() {
        let a = context(&[("app.py", "x")]);
        let b = context(&[
            ("app.py", "x"),
            (".git/HEAD", "ref: refs/heads/main"),
            ("target/debug/out", "junk"),
            ("venv/lib/site.py", "junk"),
            (".shipwrightignore", "# local env\nvenv/\n"),
        ]);
        let builder = ArtifactBuilder::new();
        assert_eq!(
            builder.build(a.path(), "api", "1.0.0").unwrap().digest,
            builder.build(b.path(), "api", "1.0.0").unwrap().digest
        );
    }

    #[test]
    fn layer_entries_carry_path_and_length() {
        let dir = context(&[("a.txt", "abc")]);
        let artifact = ArtifactBuilder::new().build(dir.path(), "api", "0.1.0").unwrap();
        let layer = &artifact.layers[0].bytes;
        assert!(layer.starts_with(b"a.txt\0"));
        assert!(layer.ends_with(b"\x003\nabc"));
    }

    #[test]
    fn manifest_references_blobs() {
        let dir = context(&[("a.txt", "abc")]);
        let artifact = ArtifactBuilder::new().build(dir.path(), "api", "0.1.0").unwrap();
        let manifest: serde_json::Value = serde_json::from_slice(&artifact.manifest).unwrap();
        assert_eq!(manifest["config"]["digest"], artifact.config.digest.as_str());
        assert_eq!(manifest["layers"][0]["digest"], artifact.layers[0].digest.as_str());
        assert_eq!(artifact.blobs().count(), 2);
        assert_eq!(artifact.digest, Digest::of(&artifact.manifest));
    }

    #[test]
    fn empty_context_fails() {
        let dir = context(&[(".git/HEAD", "x")]);
        let err = ArtifactBuilder::new().build(dir.path(), "api", "1.0.0").unwrap_err();
        assert!(matches!(err, BuildError::EmptyContext(_)));
    }

    #[test]
    fn rejects_bad_version_and_name() {
        let dir = context(&[("a", "b")]);
        let builder = ArtifactBuilder::new();
        assert!(matches!(
            builder.build(dir.path(), "api", "v1").unwrap_err(),
            BuildError::InvalidVersion { .. }
        ));
        assert!(matches!(
            builder.build(dir.path(), "Bad Name", "1.0.0").unwrap_err(),
            BuildError::InvalidName(_)
        ));
    }

    #[test]
    fn builder_ignore_adds_prefix() {
        let a = context(&[("app.py", "x")]);
        let b = context(&[("app.py", "x"), ("docs/readme.md", "y")]);
        let builder = ArtifactBuilder::new().ignore("docs");
        assert_eq!(
            builder.build(a.path(), "api", "1.0.0").unwrap().digest,
            builder.build(b.path(), "api", "1.0.0").unwrap().digest
        );
    }
}
