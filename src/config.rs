use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::XenoError;

pub const DEFAULT_BASE_URL: &str = "https://xeno-canto.org/api/3/recordings";
pub const DEFAULT_CACHE_DIR: &str = "xenocanto_cache";
pub const DEFAULT_AUDIO_DIR: &str = "xeno-raw";
pub const DEFAULT_SPECIES_LIST: &str = "labels.csv";
pub const DEFAULT_SUMMARY_FILE: &str = "fetch_summary.csv";
pub const DEFAULT_COUNTRY: &str = "ZA";

/// On-disk config file shape (`xenofetch.json`). Every field is optional;
/// the resolved defaults match the published API limits.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub request_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_network_retries: Option<u32>,
    #[serde(default)]
    pub rate_limit_cooldown_secs: Option<u64>,
    #[serde(default)]
    pub max_rate_limit_retries: Option<u32>,
    #[serde(default)]
    pub hourly_request_ceiling: Option<u32>,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub audio_dir: Option<String>,
    #[serde(default)]
    pub max_recordings_per_species: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
    /// Two-letter country tag; an empty string disables the filter.
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub max_audio_bytes: Option<u64>,
    #[serde(default)]
    pub species_list: Option<String>,
    #[serde(default)]
    pub summary_file: Option<String>,
}

/// Fully resolved configuration, passed explicitly into the batch driver
/// and threaded down to each component.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub api_key: String,
    pub base_url: String,
    pub request_delay: Duration,
    pub max_network_retries: u32,
    pub rate_limit_cooldown: Duration,
    pub max_rate_limit_retries: u32,
    pub hourly_request_ceiling: u32,
    pub cache_dir: Utf8PathBuf,
    pub audio_dir: Utf8PathBuf,
    pub max_recordings_per_species: u32,
    pub per_page: u32,
    pub country: Option<String>,
    pub max_audio_bytes: u64,
    pub species_list: Utf8PathBuf,
    pub summary_file: Utf8PathBuf,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `xenofetch.json` (or an explicit path) and resolves defaults.
    /// Without an explicit path a missing file is fine as long as the API
    /// key is available from the environment.
    pub fn resolve(path: Option<&str>) -> Result<FetchConfig, XenoError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("xenofetch.json"),
        };

        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| XenoError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| XenoError::ConfigParse(err.to_string()))?
        } else if path.is_some() {
            return Err(XenoError::ConfigRead(config_path));
        } else {
            Config::default()
        };

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<FetchConfig, XenoError> {
        let api_key = config
            .api_key
            .filter(|key| !key.trim().is_empty())
            .or_else(|| {
                std::env::var("XENO_CANTO_API_KEY")
                    .ok()
                    .map(|key| key.trim().to_string())
                    .filter(|key| !key.is_empty())
            })
            .ok_or(XenoError::MissingApiKey)?;

        let per_page = config.per_page.unwrap_or(100);
        if !(50..=500).contains(&per_page) {
            return Err(XenoError::InvalidPerPage(per_page));
        }

        let country = match config.country {
            Some(value) if value.trim().is_empty() => None,
            Some(value) => Some(value.trim().to_string()),
            None => Some(DEFAULT_COUNTRY.to_string()),
        };

        Ok(FetchConfig {
            api_key,
            base_url: config
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            request_delay: Duration::from_millis(config.request_delay_ms.unwrap_or(1500)),
            max_network_retries: config.max_network_retries.unwrap_or(3),
            rate_limit_cooldown: Duration::from_secs(config.rate_limit_cooldown_secs.unwrap_or(60)),
            max_rate_limit_retries: config.max_rate_limit_retries.unwrap_or(3),
            hourly_request_ceiling: config.hourly_request_ceiling.unwrap_or(800),
            cache_dir: Utf8PathBuf::from(
                config.cache_dir.unwrap_or_else(|| DEFAULT_CACHE_DIR.to_string()),
            ),
            audio_dir: Utf8PathBuf::from(
                config.audio_dir.unwrap_or_else(|| DEFAULT_AUDIO_DIR.to_string()),
            ),
            max_recordings_per_species: config.max_recordings_per_species.unwrap_or(30),
            per_page,
            country,
            max_audio_bytes: config.max_audio_bytes.unwrap_or(50 * 1024 * 1024),
            species_list: Utf8PathBuf::from(
                config
                    .species_list
                    .unwrap_or_else(|| DEFAULT_SPECIES_LIST.to_string()),
            ),
            summary_file: Utf8PathBuf::from(
                config
                    .summary_file
                    .unwrap_or_else(|| DEFAULT_SUMMARY_FILE.to_string()),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn base_config() -> Config {
        Config {
            api_key: Some("test-key".to_string()),
            ..Config::default()
        }
    }

    #[test]
    fn resolve_defaults() {
        let resolved = ConfigLoader::resolve_config(base_config()).unwrap();
        assert_eq!(resolved.base_url, DEFAULT_BASE_URL);
        assert_eq!(resolved.request_delay, Duration::from_millis(1500));
        assert_eq!(resolved.rate_limit_cooldown, Duration::from_secs(60));
        assert_eq!(resolved.hourly_request_ceiling, 800);
        assert_eq!(resolved.max_recordings_per_species, 30);
        assert_eq!(resolved.per_page, 100);
        assert_eq!(resolved.country.as_deref(), Some(DEFAULT_COUNTRY));
        assert_eq!(resolved.cache_dir, Utf8PathBuf::from(DEFAULT_CACHE_DIR));
    }

    #[test]
    fn per_page_out_of_range_is_rejected() {
        let config = Config {
            per_page: Some(10),
            ..base_config()
        };
        let err = ConfigLoader::resolve_config(config).unwrap_err();
        assert_matches!(err, XenoError::InvalidPerPage(10));
    }

    #[test]
    fn empty_country_clears_default_filter() {
        let config = Config {
            country: Some(String::new()),
            ..base_config()
        };
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.country, None);
    }

    #[test]
    fn blank_api_key_is_missing() {
        // Guard the env fallback: only meaningful when the var is unset.
        if std::env::var("XENO_CANTO_API_KEY").is_ok() {
            return;
        }
        let config = Config {
            api_key: Some("   ".to_string()),
            ..Config::default()
        };
        let err = ConfigLoader::resolve_config(config).unwrap_err();
        assert_matches!(err, XenoError::MissingApiKey);
    }
}
