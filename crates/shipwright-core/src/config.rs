//! `shipwright.toml` configuration parser.
//!
//! Every section and field is optional; missing values fall back to the
//! defaults below. Durations are written as strings ("5s", "500ms", "2m").

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::{Backoff, RetryPolicy};
use crate::error::{CoreError, CoreResult};
use crate::types::PlatformLimits;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShipwrightConfig {
    pub registry: RegistryConfig,
    pub platform: PlatformConfig,
    pub limits: PlatformLimits,
    pub poll: PollConfig,
    pub retry: RetryConfig,
    pub rollback: RollbackConfig,
    pub state: StateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry host (and optional port), reached over plain HTTP.
    /// Also the registry assumed for unqualified references.
    pub endpoint: String,
    /// Environment variable holding the short-lived bearer token.
    pub token_env: String,
    pub timeout: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost:5000".to_string(),
            token_env: "SHIPWRIGHT_REGISTRY_TOKEN".to_string(),
            timeout: "30s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Base address of the platform API, `host:port`.
    pub address: String,
    pub token_env: String,
    pub timeout: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
            token_env: "SHIPWRIGHT_PLATFORM_TOKEN".to_string(),
            timeout: "10s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval: String,
    pub max_interval: String,
    pub jitter: f64,
    /// Consecutive `Unavailable` health responses tolerated.
    pub unavailable_threshold: u32,
    /// Overall convergence deadline per attempt.
    pub timeout: String,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: "5s".to_string(),
            max_interval: "30s".to_string(),
            jitter: 0.2,
            unavailable_threshold: 5,
            timeout: "10m".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub base: String,
    pub max: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 4,
            base: "500ms".to_string(),
            max: "8s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub data_dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".shipwright"),
        }
    }
}

impl ShipwrightConfig {
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

    /// Load `path` if given, otherwise defaults.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn poll_backoff(&self) -> CoreResult<Backoff> {
        Ok(Backoff::new(
            duration_field(&self.poll.interval)?,
            duration_field(&self.poll.max_interval)?,
        )
        .with_jitter(self.poll.jitter))
    }

    pub fn poll_timeout(&self) -> CoreResult<Duration> {
        duration_field(&self.poll.timeout)
    }

    pub fn retry_policy(&self) -> CoreResult<RetryPolicy> {
        let backoff = Backoff::new(
            duration_field(&self.retry.base)?,
            duration_field(&self.retry.max)?,
        )
        .with_jitter(self.poll.jitter);
        Ok(RetryPolicy::new(self.retry.attempts, backoff))
    }

    pub fn registry_timeout(&self) -> CoreResult<Duration> {
        duration_field(&self.registry.timeout)
    }

    pub fn platform_timeout(&self) -> CoreResult<Duration> {
        duration_field(&self.platform.timeout)
    }
}

fn duration_field(s: &str) -> CoreResult<Duration> {
    parse_duration(s).ok_or_else(|| CoreError::InvalidDuration(s.to_string()))
}

/// Longest duration `parse_duration` accepts.
pub const MAX_DURATION: Duration = Duration::from_secs(30 * 24 * 3600);

/// Parse `500ms`, `5s`, `2m`, `1h` or bare seconds, up to [`MAX_DURATION`].
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let parse = |n: &str| n.trim().parse::<u64>().ok();
    let duration = if let Some(ms) = s.strip_suffix("ms") {
        parse(ms).map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        parse(secs).map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        parse(mins).and_then(|m| m.checked_mul(60)).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        parse(hours).and_then(|h| h.checked_mul(3600)).map(Duration::from_secs)
    } else {
        parse(s).map(Duration::from_secs)
    }?;
    (duration <= MAX_DURATION).then_some(duration)
}
