use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use anyhow::Context;

use super::platform;
use super::window::parse_time_append;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub records: RecordsConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Where stations come from and where recordings go.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Local TOML station file.
    /// Defaults to `$XDG_CONFIG_HOME/radiorec/stations.toml`.
    #[serde(default = "default_stations_file")]
    pub stations_file: PathBuf,
    /// Root directory for finished recordings.
    #[serde(default = "default_records_dir")]
    pub records_dir: PathBuf,
    /// Scratch directory for captures in progress.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

/// Naming of finished recordings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsConfig {
    #[serde(default = "default_subfolders")]
    pub subfolders: bool,
    #[serde(default = "default_subfolders_format")]
    pub subfolders_format: String,
    #[serde(default = "default_filename_format")]
    pub filename_format: String,
    /// Extra time recorded past a window's finish, written `NNmNNs`.
    #[serde(default = "default_time_append")]
    pub time_append: String,
    /// Expand naming patterns in local time instead of UTC.
    #[serde(default)]
    pub local_time: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// How long a connected source may take to send its response headers.
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// How long shutdown waits for running records to finalize.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            stations_file: default_stations_file(),
            records_dir: default_records_dir(),
            temp_dir: default_temp_dir(),
        }
    }
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            subfolders: default_subfolders(),
            subfolders_format: default_subfolders_format(),
            filename_format: default_filename_format(),
            time_append: default_time_append(),
            local_time: false,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout_secs(),
            response_timeout_secs: default_response_timeout_secs(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

fn default_stations_file() -> PathBuf {
    // On Windows, check for portable stations.toml in executable directory
    #[cfg(windows)]
    {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let portable_stations = exe_dir.join("stations.toml");
                if portable_stations.exists() {
                    return portable_stations;
                }
            }
        }
    }

    platform::config_dir().join("stations.toml")
}

fn default_records_dir() -> PathBuf {
    platform::records_dir()
}

fn default_temp_dir() -> PathBuf {
    platform::temp_dir()
}

fn default_subfolders() -> bool {
    true
}

fn default_subfolders_format() -> String {
    "{station}/{year}/{month}".to_string()
}

fn default_filename_format() -> String {
    "{year}{month}{day} {hour}{minute} {station} - {title}".to_string()
}

fn default_time_append() -> String {
    "00m00s".to_string()
}

fn default_user_agent() -> String {
    concat!("radiorec/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_connect_timeout_secs() -> u64 {
    15
}

fn default_response_timeout_secs() -> u64 {
    30
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl RecordsConfig {
    /// The configured pad. Unparsable text falls back to no pad.
    pub fn pad(&self) -> chrono::Duration {
        parse_time_append(&self.time_append).unwrap_or_else(|| {
            tracing::warn!(
                "config: ignoring malformed time_append {:?}",
                self.time_append
            );
            chrono::Duration::zero()
        })
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("reading {}", config_path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("parsing {}", config_path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
