//! Content digests and image references.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

/// Registry assumed when a reference names no host.
pub const DEFAULT_REGISTRY: &str = "docker.io";

static REPOSITORY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*)*$")
        .expect("repository pattern is valid")
});

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9._-]{0,127}$").expect("tag pattern is valid"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageRefError {
    #[error("empty image reference")]
    Empty,
    #[error("invalid repository name: {0}")]
    InvalidRepository(String),
    #[error("invalid tag: {0}")]
    InvalidTag(String),
    #[error("invalid digest: {0} (expected sha256:<64 hex>)")]
    InvalidDigest(String),
}

/// A `sha256:<hex>` content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    pub fn parse(s: &str) -> Result<Self, ImageRefError> {
        let hex_part = s
            .strip_prefix("sha256:")
            .ok_or_else(|| ImageRefError::InvalidDigest(s.to_string()))?;
        let well_formed = hex_part.len() == 64
            && hex_part
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
            return Err(ImageRefError::InvalidDigest(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Digest of the given bytes.
    pub fn of(bytes: &[u8]) -> Self {
        use sha2::Digest as _;
        Self(format!("sha256:{}", hex::encode(Sha256::digest(bytes))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The hex portion without the algorithm prefix.
    pub fn hex(&self) -> &str {
        &self.0["sha256:".len()..]
    }

    /// First 12 hex characters, used in deterministic tags.
    pub fn short(&self) -> &str {
        &self.hex()[..12]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Digest {
    type Error = ImageRefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Digest::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.0
    }
}

/// How an image is located inside its repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageLocator {
    /// Immutable, content-addressed.
    Digest(Digest),
    /// Mutable tag; must be resolved through the registry.
    Tag(String),
}

/// `{registry}/{repository}` plus a digest or tag.
///
/// Serialized as its textual form, e.g.
/// `registry.example.com/bookstore/api@sha256:…`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub locator: ImageLocator,
}

impl ImageReference {
    pub fn by_digest(registry: &str, repository: &str, digest: Digest) -> Self {
        Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            locator: ImageLocator::Digest(digest),
        }
    }

    pub fn by_tag(registry: &str, repository: &str, tag: &str) -> Self {
        Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            locator: ImageLocator::Tag(tag.to_string()),
        }
    }

    /// Parse a reference, filling in `default_registry` when none is named.
    ///
    /// Accepted forms: `[oci://][registry/]repository[:tag]` and
    /// `[oci://][registry/]repository@sha256:<hex>`. A missing tag means
    /// `latest`.
    pub fn parse_with_registry(uri: &str, default_registry: &str) -> Result<Self, ImageRefError> {
        let rest = uri.trim();
        let rest = rest.strip_prefix("oci://").unwrap_or(rest);
        if rest.is_empty() {
            return Err(ImageRefError::Empty);
        }

        let (name, locator) = if let Some((name, digest)) = rest.rsplit_once('@') {
            (name, ImageLocator::Digest(Digest::parse(digest)?))
        } else {
            let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
            match rest[last_slash..].rfind(':') {
                Some(i) => {
                    let split = last_slash + i;
                    let tag = &rest[split + 1..];
                    if !TAG.is_match(tag) {
                        return Err(ImageRefError::InvalidTag(tag.to_string()));
                    }
                    (&rest[..split], ImageLocator::Tag(tag.to_string()))
                }
                None => (rest, ImageLocator::Tag("latest".to_string())),
            }
        };

        let (registry, repository) = match name.split_once('/') {
            Some((host, repo)) if is_registry_host(host) => (host, repo),
            _ => (default_registry, name),
        };

        if !REPOSITORY.is_match(repository) {
            return Err(ImageRefError::InvalidRepository(repository.to_string()));
        }

        Ok(Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            locator,
        })
    }

    pub fn digest(&self) -> Option<&Digest> {
        match &self.locator {
            ImageLocator::Digest(d) => Some(d),
            ImageLocator::Tag(_) => None,
        }
    }

    /// The digest or tag as it appears in registry URLs.
    pub fn reference(&self) -> &str {
        match &self.locator {
            ImageLocator::Digest(d) => d.as_str(),
            ImageLocator::Tag(t) => t,
        }
    }

    pub fn is_pinned(&self) -> bool {
        matches!(self.locator, ImageLocator::Digest(_))
    }

    /// The same repository, pinned to `digest`.
    pub fn pinned(&self, digest: Digest) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            locator: ImageLocator::Digest(digest),
        }
    }
}

/// Whether `name` follows the OCI distribution repository grammar.
pub fn is_valid_repository(name: &str) -> bool {
    REPOSITORY.is_match(name)
}

fn is_registry_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

impl FromStr for ImageReference {
    type Err = ImageRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_with_registry(s, DEFAULT_REGISTRY)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.locator {
            ImageLocator::Digest(d) => write!(f, "{}/{}@{}", self.registry, self.repository, d),
            ImageLocator::Tag(t) => write!(f, "{}/{}:{}", self.registry, self.repository, t),
        }
    }
}

impl TryFrom<String> for ImageReference {
    type Error = ImageRefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ImageReference> for String {
    fn from(r: ImageReference) -> Self {
        r.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "4f2b8c1e9a7d3b6f0e5c2a9d8b7e6f5a4c3b2a1908f7e6d5c4b3a29180f7e6d5";

    #[test]
    fn digest_of_is_sha256() {
        let d = Digest::of(b"hello");
        assert_eq!(
            d.as_str(),
            "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(d.short(), "2cf24dba5fb0");
    }

    #[test]
    fn digest_rejects_malformed() {
        assert!(Digest::parse("md5:abc").is_err());
        assert!(Digest::parse("sha256:abc").is_err());
        assert!(Digest::parse(&format!("sha256:{}", HEX.to_uppercase())).is_err());
        assert!(Digest::parse(&format!("sha256:{HEX}")).is_ok());
    }

    #[test]
    fn parse_pinned_reference() {
        let uri = format!("registry.example.com/bookstore/api@sha256:{HEX}");
        let r: ImageReference = uri.parse().unwrap();
        assert_eq!(r.registry, "registry.example.com");
        assert_eq!(r.repository, "bookstore/api");
        assert!(r.is_pinned());
        assert_eq!(r.to_string(), uri);
    }

    #[test]
    fn parse_tag_with_registry_port() {
        let r: ImageReference = "oci://localhost:5000/api:v1.2.0".parse().unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "api");
        assert_eq!(r.locator, ImageLocator::Tag("v1.2.0".to_string()));
    }

    #[test]
    fn parse_defaults_registry_and_tag() {
        let r = ImageReference::parse_with_registry("team/api", "ecr.local").unwrap();
        assert_eq!(r.registry, "ecr.local");
        assert_eq!(r.repository, "team/api");
        assert_eq!(r.reference(), "latest");
    }

    #[test]
    fn parse_rejects_bad_names() {
        assert_eq!(ImageReference::from_str(""), Err(ImageRefError::Empty));
        assert!(matches!(
            ImageReference::from_str("Registry.io/UPPER:v1"),
            Err(ImageRefError::InvalidRepository(_))
        ));
        assert!(matches!(
            ImageReference::from_str("api:-bad"),
            Err(ImageRefError::InvalidTag(_))
        ));
        assert!(matches!(
            ImageReference::from_str("api@sha256:nothex"),
            Err(ImageRefError::InvalidDigest(_))
        ));
    }

    #[test]
    fn serializes_as_string() {
        let r = ImageReference::by_tag("registry.example.com", "api", "v1");
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, "\"registry.example.com/api:v1\"");
        let back: ImageReference = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
