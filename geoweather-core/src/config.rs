use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

use crate::{
    cache::FileStore,
    client::DEFAULT_BASE_URL,
    display::{ConditionPolicy, region_from_locale, units_for_region},
    location::{self, Accuracy, LocationRequest},
    model::{Coordinate, Units},
    pipeline::{DEFAULT_FIX_TIMEOUT, PipelineOptions},
};

/// Environment variable that overrides the stored API key.
pub const API_KEY_ENV: &str = "GEOWEATHER_API_KEY";

/// Where position fixes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
    /// The configured latitude/longitude.
    #[default]
    Static,
    /// IP-based geolocation lookup.
    Ip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationConfig {
    #[serde(default)]
    pub source: LocationSource,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_fix_timeout_secs")]
    pub fix_timeout_secs: u64,
    #[serde(default = "default_ip_endpoint")]
    pub ip_endpoint: String,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            source: LocationSource::default(),
            latitude: None,
            longitude: None,
            interval_ms: default_interval_ms(),
            fix_timeout_secs: default_fix_timeout_secs(),
            ip_endpoint: default_ip_endpoint(),
        }
    }
}

fn default_interval_ms() -> u64 {
    location::DEFAULT_INTERVAL.as_millis() as u64
}

fn default_fix_timeout_secs() -> u64 {
    DEFAULT_FIX_TIMEOUT.as_secs()
}

fn default_ip_endpoint() -> String {
    location::DEFAULT_IP_ENDPOINT.to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// api_key = "..."
/// units = "metric"
/// location_consent = true
///
/// [location]
/// latitude = 51.5
/// longitude = -0.12
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Unit system to request; derived from the region when unset.
    pub units: Option<Units>,

    /// Region code such as "US"; derived from the locale when unset.
    pub region: Option<String>,

    #[serde(default)]
    pub condition_policy: ConditionPolicy,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// The user's answer to "may we use your location?", if asked yet.
    pub location_consent: Option<bool>,

    #[serde(default = "default_true")]
    pub notify_http_errors: bool,

    /// Override for the key-value store file.
    pub store_path: Option<PathBuf>,

    // Kept last: TOML tables must follow plain keys.
    #[serde(default)]
    pub location: LocationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            units: None,
            region: None,
            condition_policy: ConditionPolicy::default(),
            timeout_secs: default_timeout_secs(),
            location_consent: None,
            notify_http_errors: true,
            store_path: None,
            location: LocationConfig::default(),
        }
    }
}

impl Config {
    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "geoweather", "geoweather")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// API key from the environment, falling back to the stored one.
    pub fn api_key(&self) -> Result<String> {
        self.api_key_with_env(std::env::var(API_KEY_ENV).ok())
    }

    pub fn api_key_with_env(&self, env_value: Option<String>) -> Result<String> {
        env_value
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.api_key.clone().filter(|k| !k.trim().is_empty()))
            .ok_or_else(|| {
                anyhow!(
                    "No weather API key configured.\n\
                     Hint: run `geoweather configure` or set {API_KEY_ENV}."
                )
            })
    }

    pub fn coordinate(&self) -> Option<Coordinate> {
        match (self.location.latitude, self.location.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)),
            _ => None,
        }
    }

    pub fn set_coordinate(&mut self, coord: Coordinate) -> Result<()> {
        if !coord.is_valid() {
            return Err(anyhow!(
                "Coordinate {coord} is out of range (latitude -90..90, longitude -180..180)."
            ));
        }
        self.location.latitude = Some(coord.latitude);
        self.location.longitude = Some(coord.longitude);
        Ok(())
    }

    /// Configured region, else the region of `locale`, else empty.
    pub fn region_or_locale(&self, locale: Option<&str>) -> String {
        self.region
            .clone()
            .filter(|r| !r.trim().is_empty())
            .or_else(|| locale.and_then(region_from_locale))
            .unwrap_or_default()
    }

    pub fn units_for(&self, region: &str) -> Units {
        self.units.unwrap_or_else(|| units_for_region(region))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn location_request(&self) -> LocationRequest {
        LocationRequest {
            accuracy: Accuracy::HighAccuracy,
            interval: Duration::from_millis(self.location.interval_ms.max(1)),
        }
    }

    pub fn pipeline_options(&self, region: String) -> PipelineOptions {
        PipelineOptions {
            units: self.units_for(&region),
            region,
            condition_policy: self.condition_policy,
            location_request: self.location_request(),
            fix_timeout: Duration::from_secs(self.location.fix_timeout_secs.max(1)),
            notify_http_errors: self.notify_http_errors,
        }
    }

    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => FileStore::default_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_errors_when_not_set() {
        let cfg = Config::default();
        let err = cfg.api_key_with_env(None).unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("No weather API key configured"));
        assert!(msg.contains("Hint: run `geoweather configure`"));
    }

    #[test]
    fn env_api_key_overrides_stored_key() {
        let cfg = Config { api_key: Some("STORED".into()), ..Default::default() };

        assert_eq!(cfg.api_key_with_env(Some("FROM_ENV".into())).expect("key"), "FROM_ENV");
        assert_eq!(cfg.api_key_with_env(Some("  ".into())).expect("key"), "STORED");
        assert_eq!(cfg.api_key_with_env(None).expect("key"), "STORED");
    }

    #[test]
    fn minimal_file_fills_defaults() {
        let cfg: Config = toml::from_str("api_key = \"K\"\n").expect("parse");

        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.timeout_secs, 5);
        assert_eq!(cfg.location.interval_ms, 10_000);
        assert_eq!(cfg.location.source, LocationSource::Static);
        assert!(cfg.notify_http_errors);
        assert_eq!(cfg.condition_policy, ConditionPolicy::LastWins);
    }

    #[test]
    fn save_and_load_round_trip() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("conf").join("config.toml");

        let mut cfg = Config {
            api_key: Some("KEY".into()),
            units: Some(Units::Imperial),
            region: Some("US".into()),
            condition_policy: ConditionPolicy::FirstWins,
            location_consent: Some(true),
            ..Default::default()
        };
        cfg.set_coordinate(Coordinate::new(51.5, -0.12)).expect("valid coordinate");
        cfg.location.source = LocationSource::Ip;

        cfg.save_to(&path).expect("save");
        let loaded = Config::load_from(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn missing_file_loads_default() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let cfg = Config::load_from(&tmp.path().join("absent.toml")).expect("load");
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn broken_file_reports_path() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("config.toml");
        fs::write(&path, "api_key = [").expect("write");

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn out_of_range_coordinate_rejected() {
        let mut cfg = Config::default();
        assert!(cfg.set_coordinate(Coordinate::new(100.0, 0.0)).is_err());
        assert_eq!(cfg.coordinate(), None);
    }

    #[test]
    fn region_and_units_resolution() {
        let cfg = Config::default();
        assert_eq!(cfg.region_or_locale(Some("en_US.UTF-8")), "US");
        assert_eq!(cfg.region_or_locale(None), "");
        assert_eq!(cfg.units_for("US"), Units::Imperial);
        assert_eq!(cfg.units_for("GB"), Units::Metric);

        let pinned = Config {
            region: Some("GB".into()),
            units: Some(Units::Imperial),
            ..Default::default()
        };
        assert_eq!(pinned.region_or_locale(Some("en_US.UTF-8")), "GB");
        assert_eq!(pinned.units_for("GB"), Units::Imperial);
    }

    #[test]
    fn pipeline_options_follow_config() {
        let cfg = Config {
            notify_http_errors: false,
            condition_policy: ConditionPolicy::FirstWins,
            ..Default::default()
        };
        let opts = cfg.pipeline_options("LR".into());

        assert_eq!(opts.units, Units::Imperial);
        assert_eq!(opts.region, "LR");
        assert!(!opts.notify_http_errors);
        assert_eq!(opts.condition_policy, ConditionPolicy::FirstWins);
        assert_eq!(opts.location_request.interval, Duration::from_secs(10));
        assert_eq!(opts.fix_timeout, Duration::from_secs(30));
    }
}
