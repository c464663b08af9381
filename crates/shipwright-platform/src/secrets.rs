//! Secret provider boundary: existence checks only, values are never read.

use std::collections::HashSet;

use shipwright_core::{BoxFuture, SecretReference};
use thiserror::Error;

/// Prefix of the environment variables consulted by [`EnvSecretProvider`].
pub const SECRET_ENV_PREFIX: &str = "SHIPWRIGHT_SECRET_";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SecretError {
    #[error("secret provider unavailable: {0}")]
    Unavailable(String),
}

pub trait SecretProvider: Send + Sync {
    /// Whether the provider knows `reference`.
    fn exists<'a>(&'a self, reference: &'a SecretReference) -> BoxFuture<'a, Result<bool, SecretError>>;
}

/// Knows a reference when an environment variable derived from its provider
/// path is set, e.g. `ssm:/prod/db-url` → `SHIPWRIGHT_SECRET_PROD_DB_URL`.
///
/// Only presence is checked.
#[derive(Debug, Clone)]
pub struct EnvSecretProvider {
    prefix: String,
}

impl EnvSecretProvider {
    pub fn new() -> Self {
        Self::with_prefix(SECRET_ENV_PREFIX)
    }

    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    /// Environment variable consulted for `provider_path`.
    pub fn variable_for(&self, provider_path: &str) -> String {
        let path = provider_path
            .split_once(':')
            .map(|(_, rest)| rest)
            .unwrap_or(provider_path);
        let words: Vec<String> = path
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_ascii_uppercase)
            .collect();
        format!("{}{}", self.prefix, words.join("_"))
    }
}

impl Default for EnvSecretProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretProvider for EnvSecretProvider {
    fn exists<'a>(&'a self, reference: &'a SecretReference) -> BoxFuture<'a, Result<bool, SecretError>> {
        Box::pin(async move { Ok(std::env::var_os(self.variable_for(&reference.provider_path)).is_some()) })
    }
}

/// A fixed set of known provider paths.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretProvider {
    known: HashSet<String>,
}

impl StaticSecretProvider {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: paths.into_iter().map(Into::into).collect(),
        }
    }
}

impl SecretProvider for StaticSecretProvider {
    fn exists<'a>(&'a self, reference: &'a SecretReference) -> BoxFuture<'a, Result<bool, SecretError>> {
        Box::pin(async move { Ok(self.known.contains(&reference.provider_path)) })
    }
}
