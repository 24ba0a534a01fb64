use crate::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod loader;

pub const DEFAULT_DATA_VERSION: &str = crate::refresh::DEFAULT_DATA_VERSION;
pub const DEFAULT_FIRST_ADDENDUM: &str = crate::addendum::DEFAULT_FIRST_ADDENDUM;
pub const DEFAULT_NUM_LEDS: usize = crate::traffic::DEFAULT_NUM_LEDS;
pub const DEFAULT_BLOCK_SIZE: usize = crate::addendum::DEFAULT_BLOCK_SIZE;
pub const DEFAULT_RETRY_COUNT: u32 = crate::addendum::DEFAULT_ATTEMPTS;
pub const DEFAULT_LIVE_REFRESH: Duration = Duration::from_secs(60);
pub const DEFAULT_TYPICAL_REFRESH: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_ERROR_FLASH_MS: u64 = 500;
pub const MIN_BLOCK_SIZE: usize = 16;
const CONFIG_DIR_NAME: &str = ".trafficflow";
const CONFIG_FILE_NAME: &str = "config.toml";
const STORE_DIR_NAME: &str = "store";
const CACHE_DIR_NAME: &str = "cache";

/// User-supplied settings loaded from the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub server_url: Option<String>,
    pub data_version: String,
    pub first_addendum: String,
    pub device_id: Option<String>,
    pub num_leds: usize,
    pub block_size: usize,
    pub retry_count: u32,
    pub live_refresh: Duration,
    pub typical_refresh: Duration,
    pub error_flash_ms: u64,
    pub indicator_path: Option<String>,
    pub store_dir: Option<String>,
    pub cache_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: None,
            data_version: DEFAULT_DATA_VERSION.to_string(),
            first_addendum: DEFAULT_FIRST_ADDENDUM.to_string(),
            device_id: None,
            num_leds: DEFAULT_NUM_LEDS,
            block_size: DEFAULT_BLOCK_SIZE,
            retry_count: DEFAULT_RETRY_COUNT,
            live_refresh: DEFAULT_LIVE_REFRESH,
            typical_refresh: DEFAULT_TYPICAL_REFRESH,
            error_flash_ms: DEFAULT_ERROR_FLASH_MS,
            indicator_path: None,
            store_dir: None,
            cache_dir: None,
        }
    }
}

impl Config {
    pub fn load_or_default() -> Result<Self> {
        loader::load_or_default()
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        loader::load_from_path(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        loader::save_to_path(self, path)
    }

    /// Persisted tables live here; defaults to `$HOME/.trafficflow/store`.
    pub fn resolved_store_dir(&self) -> Result<PathBuf> {
        resolve_dir(self.store_dir.as_deref(), STORE_DIR_NAME)
    }

    /// Telemetry lives here; defaults to `$HOME/.trafficflow/cache`.
    pub fn resolved_cache_dir(&self) -> Result<PathBuf> {
        resolve_dir(self.cache_dir.as_deref(), CACHE_DIR_NAME)
    }
}

fn resolve_dir(configured: Option<&str>, default_name: &str) -> Result<PathBuf> {
    match configured {
        Some(dir) => Ok(PathBuf::from(dir)),
        None => Ok(loader::config_home()?.join(default_name)),
    }
}

pub(crate) fn validate(cfg: &Config) -> Result<()> {
    use crate::Error;

    if let Some(url) = &cfg.server_url {
        if !url.starts_with("http://") {
            return Err(Error::InvalidArgs(format!(
                "server_url must be an http:// url, got '{url}'"
            )));
        }
    }
    if cfg.num_leds == 0 || cfg.num_leds > usize::from(u16::MAX) {
        return Err(Error::InvalidArgs(format!(
            "num_leds must be between 1 and {}",
            u16::MAX
        )));
    }
    // A chain pointer `{url}` must fit in the first `block_size - 1` bytes.
    if cfg.block_size < MIN_BLOCK_SIZE {
        return Err(Error::InvalidArgs(format!(
            "block_size must be at least {MIN_BLOCK_SIZE} (chain pointers must fit in one block)"
        )));
    }
    if cfg.retry_count == 0 {
        return Err(Error::InvalidArgs("retry_count must be at least 1".into()));
    }
    if cfg.error_flash_ms == 0 {
        return Err(Error::InvalidArgs("error_flash_ms must be positive".into()));
    }
    if cfg.live_refresh.is_zero() || cfg.typical_refresh.is_zero() {
        return Err(Error::InvalidArgs("refresh intervals must be positive".into()));
    }
    if cfg.data_version.is_empty() || cfg.first_addendum.is_empty() {
        return Err(Error::InvalidArgs(
            "data_version and first_addendum must not be empty".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        validate(&Config::default()).unwrap();
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let cfg = Config {
            num_leds: 0,
            ..Config::default()
        };
        assert!(format!("{}", validate(&cfg).unwrap_err()).contains("num_leds"));

        let cfg = Config {
            block_size: 8,
            ..Config::default()
        };
        assert!(format!("{}", validate(&cfg).unwrap_err()).contains("block_size"));

        let cfg = Config {
            server_url: Some("https://secure.example".into()),
            ..Config::default()
        };
        assert!(format!("{}", validate(&cfg).unwrap_err()).contains("http://"));

        let cfg = Config {
            retry_count: 0,
            ..Config::default()
        };
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn explicit_dirs_win_over_home() {
        let cfg = Config {
            store_dir: Some("/var/lib/trafficflow".into()),
            cache_dir: Some("/run/trafficflow".into()),
            ..Config::default()
        };
        assert_eq!(
            cfg.resolved_store_dir().unwrap(),
            PathBuf::from("/var/lib/trafficflow")
        );
        assert_eq!(
            cfg.resolved_cache_dir().unwrap(),
            PathBuf::from("/run/trafficflow")
        );
    }
}
