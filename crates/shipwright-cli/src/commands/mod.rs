pub mod build;
pub mod deploy;
pub mod history;
pub mod init;

use std::path::{Path, PathBuf};

use anyhow::Context;
use shipwright_core::ShipwrightConfig;
use shipwright_state::StateStore;

pub const EXIT_ERROR: u8 = 1;
pub const EXIT_INVALID: u8 = 2;
pub const EXIT_TIMEOUT: u8 = 3;
pub const EXIT_CANCELLED: u8 = 4;
pub const EXIT_UNAUTHORIZED: u8 = 5;
pub const EXIT_ROLLED_BACK: u8 = 6;
pub const EXIT_ROLLBACK_FAILED: u8 = 7;

const STATE_FILE: &str = "shipwright.redb";

/// Loaded configuration with command-line overrides applied.
pub struct Settings {
    pub config: ShipwrightConfig,
}

impl Settings {
    pub fn load(config_path: Option<&Path>, data_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = ShipwrightConfig::load(config_path).context("loading configuration")?;
        if let Some(dir) = data_dir {
            config.state.data_dir = dir;
        }
        Ok(Self { config })
    }

    pub fn state_path(&self) -> PathBuf {
        self.config.state.data_dir.join(STATE_FILE)
    }

    /// Open the attempt log, creating the data directory if needed.
    pub fn open_state(&self) -> anyhow::Result<StateStore> {
        let dir = &self.config.state.data_dir;
        std::fs::create_dir_all(dir).with_context(|| format!("creating data dir {}", dir.display()))?;
        let path = self.state_path();
        StateStore::open(&path).with_context(|| format!("opening state store {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_flag_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("shipwright.toml");
        std::fs::write(&config, "[state]\ndata_dir = \"/var/lib/shipwright\"\n").unwrap();

        let from_file = Settings::load(Some(&config), None).unwrap();
        assert_eq!(from_file.state_path(), PathBuf::from("/var/lib/shipwright/shipwright.redb"));

        let overridden = Settings::load(Some(&config), Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(overridden.state_path(), dir.path().join("shipwright.redb"));
    }

    #[test]
    fn open_state_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("nested").join("state");
        let settings = Settings::load(None, Some(data_dir.clone())).unwrap();

        settings.open_state().unwrap();
        assert!(data_dir.join("shipwright.redb").is_file());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("absent.toml")), None).is_err());
    }
}
