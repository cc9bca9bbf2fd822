//! Configuration management for qrattend.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::queue::FlushPolicy;
use crate::record::DEFAULT_MODE;
use crate::scanner::ScanOptions;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "qrattend";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "queue.db";

/// Default key the offline queue is persisted under.
pub const DEFAULT_QUEUE_KEY: &str = "qr_attendance_queue_v1";

/// Bare environment variable that names the remote endpoint.
pub const ENDPOINT_ENV_VAR: &str = "GAS_ENDPOINT";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `QRATTEND_`, nested with `__`)
/// 2. The bare `GAS_ENDPOINT` environment variable
/// 3. TOML config file at `~/.config/qrattend/config.toml`
/// 4. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote endpoint configuration.
    pub endpoint: EndpointConfig,
    /// Scan session configuration.
    pub session: SessionConfig,
    /// Offline queue configuration.
    pub queue: QueueConfig,
    /// Connectivity probe configuration.
    pub connectivity: ConnectivityConfig,
}

/// Remote endpoint configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// URL that accepts attendance records as JSON POST bodies.
    /// Unset is a valid state: records are then neither sent nor queued.
    pub url: Option<String>,
}

/// Scan session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Attendance mode used when the operator has not picked one.
    pub default_mode: String,
    /// Lab identifier stamped on every record.
    pub lab: String,
    /// Delay before scanning resumes after a processed scan, in milliseconds.
    pub restart_delay_ms: u64,
    /// Frames per second requested from the scanner.
    pub fps: u32,
    /// Width of the scan region in pixels.
    pub qrbox_width: u32,
    /// Height of the scan region in pixels.
    pub qrbox_height: u32,
    /// Preview aspect ratio.
    pub aspect_ratio: f64,
    /// Index of the camera to start with.
    pub camera_index: usize,
}

/// Offline queue configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Path to the queue database file.
    /// Defaults to `~/.local/share/qrattend/queue.db`
    pub database_path: Option<PathBuf>,
    /// Key the pending records are stored under.
    pub key: String,
    /// What happens to records that fail during a flush.
    pub flush_policy: FlushPolicy,
}

/// Connectivity probe configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Seconds between reachability probes of the endpoint host.
    /// Set to 0 to disable periodic probing; the host is still checked at
    /// startup and before an operator flush.
    pub probe_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_mode: DEFAULT_MODE.to_string(),
            lab: String::new(),
            restart_delay_ms: 600,
            fps: 12,
            qrbox_width: 300,
            qrbox_height: 200,
            aspect_ratio: 1.77,
            camera_index: 0,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Will be resolved to default at runtime
            key: DEFAULT_QUEUE_KEY.to_string(),
            flush_policy: FlushPolicy::default(),
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 15,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file).nested())
            .merge(
                Env::raw()
                    .only(&[ENDPOINT_ENV_VAR])
                    .map(|_| "endpoint.url".into()),
            )
            .merge(Env::prefixed("QRATTEND_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = self.endpoint_url() {
            let parsed = reqwest::Url::parse(url)
                .map_err(|e| Error::config_validation(format!("invalid endpoint url {url}: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(Error::config_validation(format!(
                    "endpoint url must be http or https, got {}",
                    parsed.scheme()
                )));
            }
        }

        if self.session.fps == 0 {
            return Err(Error::config_validation("fps must be greater than 0"));
        }

        if self.session.aspect_ratio <= 0.0 || !self.session.aspect_ratio.is_finite() {
            return Err(Error::config_validation(format!(
                "aspect_ratio must be a positive number, got {}",
                self.session.aspect_ratio
            )));
        }

        if self.queue.key.trim().is_empty() {
            return Err(Error::config_validation("queue key cannot be empty"));
        }

        Ok(())
    }

    /// Get the endpoint URL, treating a blank value as unset.
    #[must_use]
    pub fn endpoint_url(&self) -> Option<&str> {
        self.endpoint
            .url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.queue
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the restart delay as a Duration.
    #[must_use]
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.session.restart_delay_ms)
    }

    /// Get the probe interval, or `None` when probing is disabled.
    #[must_use]
    pub fn probe_interval(&self) -> Option<Duration> {
        match self.connectivity.probe_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Build the scanner options from the session settings.
    #[must_use]
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            fps: self.session.fps,
            qrbox_width: self.session.qrbox_width,
            qrbox_height: self.session.qrbox_height,
            aspect_ratio: self.session.aspect_ratio,
            prefer_native_barcode_detector: true,
        }
    }
}
