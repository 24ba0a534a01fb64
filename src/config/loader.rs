use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{Error, Result};

use super::{Config, CONFIG_DIR_NAME, CONFIG_FILE_NAME};

pub fn load_or_default() -> Result<Config> {
    let path = config_path()?;
    if !path.exists() {
        let cfg = Config::default();
        save_to_path(&cfg, &path)?;
        super::validate(&cfg)?;
        return Ok(cfg);
    }
    load_from_path(&path)
}

pub fn load_from_path(path: &Path) -> Result<Config> {
    if !path.exists() {
        let cfg = Config::default();
        super::validate(&cfg)?;
        return Ok(cfg);
    }

    let raw = fs::read_to_string(path)?;
    parse(&raw)
}

pub fn save_to_path(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let contents = format!(
        "# trafficflow config\n\
server_url = {}\n\
data_version = \"{}\"\n\
first_addendum = \"{}\"\n\
device_id = {}\n\
num_leds = {}\n\
block_size = {}\n\
retry_count = {}\n\
live_refresh = \"{}\"\n\
typical_refresh = \"{}\"\n\
error_flash_ms = {}\n\
indicator_path = {}\n\
store_dir = {}\n\
cache_dir = {}\n",
        format_optional(&config.server_url),
        config.data_version,
        config.first_addendum,
        format_optional(&config.device_id),
        config.num_leds,
        config.block_size,
        config.retry_count,
        humantime::format_duration(config.live_refresh),
        humantime::format_duration(config.typical_refresh),
        config.error_flash_ms,
        format_optional(&config.indicator_path),
        format_optional(&config.store_dir),
        format_optional(&config.cache_dir),
    );
    fs::write(path, contents)?;
    Ok(())
}

pub fn parse(raw: &str) -> Result<Config> {
    let mut cfg = Config::default();

    for (idx, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (key, value) = trimmed.split_once('=').ok_or_else(|| {
            Error::InvalidArgs(format!("invalid config line {}: '{}'", idx + 1, line))
        })?;

        let key = key.trim();
        let raw_value = value.trim();
        let value = raw_value.trim_matches('"');
        let line_no = idx + 1;
        match key {
            "server_url" => cfg.server_url = parse_optional(raw_value),
            "data_version" => cfg.data_version = value.to_string(),
            "first_addendum" => cfg.first_addendum = value.to_string(),
            "device_id" => cfg.device_id = parse_optional(raw_value),
            "num_leds" => {
                cfg.num_leds = value.parse().map_err(|_| {
                    Error::InvalidArgs(format!("invalid num_leds value on line {line_no}"))
                })?;
            }
            "block_size" => {
                cfg.block_size = value.parse().map_err(|_| {
                    Error::InvalidArgs(format!("invalid block_size value on line {line_no}"))
                })?;
            }
            "retry_count" => {
                cfg.retry_count = value.parse().map_err(|_| {
                    Error::InvalidArgs(format!("invalid retry_count value on line {line_no}"))
                })?;
            }
            "live_refresh" => cfg.live_refresh = parse_interval(key, value, line_no)?,
            "typical_refresh" => cfg.typical_refresh = parse_interval(key, value, line_no)?,
            "error_flash_ms" => {
                cfg.error_flash_ms = value.parse().map_err(|_| {
                    Error::InvalidArgs(format!("invalid error_flash_ms value on line {line_no}"))
                })?;
            }
            "indicator_path" => cfg.indicator_path = parse_optional(raw_value),
            "store_dir" => cfg.store_dir = parse_optional(raw_value),
            "cache_dir" => cfg.cache_dir = parse_optional(raw_value),
            other => {
                return Err(Error::InvalidArgs(format!(
                    "unknown config key '{other}' on line {line_no}"
                )));
            }
        }
    }

    super::validate(&cfg)?;
    Ok(cfg)
}

/// `$HOME/.trafficflow`
pub(crate) fn config_home() -> Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| Error::InvalidArgs("HOME not set; cannot locate config directory".into()))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

fn config_path() -> Result<PathBuf> {
    Ok(config_home()?.join(CONFIG_FILE_NAME))
}

fn parse_interval(key: &str, value: &str, line_no: usize) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| Error::InvalidArgs(format!("invalid {key} on line {line_no}: {e}")))
}

fn parse_optional(raw: &str) -> Option<String> {
    if raw == "null" {
        return None;
    }
    let value = raw.trim_matches('"');
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn format_optional(value: &Option<String>) -> String {
    value
        .as_ref()
        .map(|v| format!("\"{v}\""))
        .unwrap_or_else(|| "null".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(name: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_micros();
        std::env::temp_dir().join(format!("trafficflow_test_{name}_{stamp}"))
    }

    #[test]
    fn loads_default_when_missing() {
        let path = temp_path("missing");
        let cfg = load_from_path(&path).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn parses_valid_config() {
        let contents = r#"
            # comment
            server_url = "http://traffic.local:8080"
            data_version = "V2_0_0"
            first_addendum = "V2_0_0"
            device_id = "a4:cf:12:00:00:01"
            num_leds = 300
            block_size = 256
            retry_count = 3
            live_refresh = "90s"
            typical_refresh = "12h"
            error_flash_ms = 250
            indicator_path = "/sys/class/leds/status/brightness"
            store_dir = null
            cache_dir = "/run/trafficflow"
        "#;
        let cfg = parse(contents).unwrap();
        assert_eq!(cfg.server_url.as_deref(), Some("http://traffic.local:8080"));
        assert_eq!(cfg.data_version, "V2_0_0");
        assert_eq!(cfg.first_addendum, "V2_0_0");
        assert_eq!(cfg.device_id.as_deref(), Some("a4:cf:12:00:00:01"));
        assert_eq!(cfg.num_leds, 300);
        assert_eq!(cfg.block_size, 256);
        assert_eq!(cfg.retry_count, 3);
        assert_eq!(cfg.live_refresh, Duration::from_secs(90));
        assert_eq!(cfg.typical_refresh, Duration::from_secs(12 * 3600));
        assert_eq!(cfg.error_flash_ms, 250);
        assert_eq!(
            cfg.indicator_path.as_deref(),
            Some("/sys/class/leds/status/brightness")
        );
        assert_eq!(cfg.store_dir, None);
        assert_eq!(cfg.cache_dir.as_deref(), Some("/run/trafficflow"));
    }

    #[test]
    fn rejects_unknown_key_and_bad_values() {
        let err = parse("nope = 1").unwrap_err();
        assert!(format!("{err}").contains("unknown config key"));

        let err = parse("live_refresh = \"soon\"").unwrap_err();
        assert!(format!("{err}").contains("invalid live_refresh on line 1"));

        let err = parse("num_leds = 0").unwrap_err();
        assert!(format!("{err}").contains("num_leds"));

        let err = parse("just words").unwrap_err();
        assert!(format!("{err}").contains("invalid config line 1"));
    }

    #[test]
    fn saves_and_loads_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Config {
            server_url: Some("http://10.0.0.2".into()),
            device_id: Some("dev-7".into()),
            live_refresh: Duration::from_secs(45),
            typical_refresh: Duration::from_secs(6 * 3600),
            indicator_path: Some("/tmp/led".into()),
            store_dir: Some("/tmp/store".into()),
            ..Config::default()
        };
        save_to_path(&cfg, &path).unwrap();
        let loaded = load_from_path(&path).unwrap();
        assert_eq!(cfg, loaded);
    }
}
