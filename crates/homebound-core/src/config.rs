//! Agent configuration management.
//!
//! Configuration is layered:
//!
//! 1. compiled-in defaults for every field,
//! 2. a TOML file (`/etc/homebound/config.toml` on Linux, the platform
//!    config directory elsewhere),
//! 3. `HOMEBOUND__SECTION__FIELD` environment variables.
//!
//! Backend behaviour (rate limits, thresholds, messages) is not configured
//! here; it comes from the remote flags in [`crate::remote`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sampler::{SamplerConfig, MAX_CHECK_INTERVAL, MIN_CHECK_INTERVAL};
use crate::scanner::ScannerConfig;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "HOMEBOUND";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Errors from loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A source could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    LoadError(#[from] ::config::ConfigError),

    /// Writing the file failed.
    #[error("failed to write {}: {source}", path.display())]
    WriteError {
        /// Target path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration could not be rendered as TOML.
    #[error("failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field is invalid.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong.
        message: String,
    },

    /// Several fields are invalid.
    #[error("{} configuration errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Where state lives on disk.
    pub storage: StorageConfig,
    /// Local status API.
    pub server: ServerConfig,
    /// Backend connection.
    pub backend: BackendConfig,
    /// This device's identity.
    pub identity: IdentityConfig,
    /// Location sampler tuning.
    pub sampler: SamplerSettings,
    /// Proximity scanner tuning.
    pub scanner: ScannerSettings,
    /// Proximity advertiser.
    pub advertiser: AdvertiserSettings,
    /// Location input and region monitoring.
    pub location: LocationSettings,
    /// Which Bluetooth stack backs the radio roles.
    pub radio: RadioSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// On-disk locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the settings document and outboxes.
    pub data_dir: PathBuf,
    /// JSON snapshot of remote flags, if any.
    pub remote_config: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            remote_config: None,
        }
    }
}

impl StorageConfig {
    /// Settings document path.
    #[must_use]
    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    /// Location outbox path.
    #[must_use]
    pub fn locations_path(&self) -> PathBuf {
        self.data_dir.join("locations.jsonl")
    }

    /// Default directory for production log files.
    #[must_use]
    pub fn logs_path(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Contact outbox path.
    #[must_use]
    pub fn connections_path(&self) -> PathBuf {
        self.data_dir.join("connections.jsonl")
    }
}

/// Local API listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

/// Backend connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Overrides the remote `apiHost` flag.
    pub api_host: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_host: None,
            timeout_secs: 30,
        }
    }
}

/// Identity seeded into the settings store on first start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Device identity string; generated when unset.
    pub device_id: Option<String>,
    /// Registered profile identifier.
    pub profile_id: Option<u32>,
}

/// Location sampler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerSettings {
    /// Seconds between cycles (2 to 170).
    pub check_interval_secs: u64,
    /// Worst accepted fix accuracy in metres.
    pub acceptable_accuracy: f64,
    /// Settle attempts per cycle before giving up.
    pub max_settle_retries: u32,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: 10,
            acceptable_accuracy: 100.0,
            max_settle_retries: crate::sampler::DEFAULT_MAX_SETTLE_RETRIES,
        }
    }
}

impl SamplerSettings {
    /// The clamped sampler configuration.
    #[must_use]
    pub fn to_sampler_config(&self) -> SamplerConfig {
        SamplerConfig::new(
            Duration::from_secs(self.check_interval_secs),
            self.acceptable_accuracy,
            self.max_settle_retries,
        )
    }
}

/// Proximity scanner settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSettings {
    /// Run the scanner.
    pub enabled: bool,
    /// Apply the RSSI window.
    pub rssi_filter: bool,
    /// Lower RSSI bound in dBm.
    pub rssi_min: i16,
    /// Upper RSSI bound in dBm.
    pub rssi_max: i16,
    /// Seconds a read peer is remembered.
    pub dedup_window_secs: u64,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            rssi_filter: true,
            rssi_min: -90,
            rssi_max: 0,
            dedup_window_secs: 300,
        }
    }
}

impl ScannerSettings {
    /// The scanner configuration.
    #[must_use]
    pub fn to_scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            rssi_window: self.rssi_filter.then_some(self.rssi_min..=self.rssi_max),
            dedup_window: Duration::from_secs(self.dedup_window_secs),
        }
    }
}

/// Proximity advertiser settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertiserSettings {
    /// Run the advertiser.
    pub enabled: bool,
}

impl Default for AdvertiserSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Location input settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationSettings {
    /// JSON Lines file of fixes to replay, one `LocationSample` per line.
    pub feed: Option<PathBuf>,
    /// Largest region radius the software region monitor accepts, in metres.
    pub max_region_radius: f64,
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            feed: None,
            max_region_radius: 10_000.0,
        }
    }
}

/// Bluetooth stack behind the advertiser and the scanner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RadioBackend {
    /// No radio. Both roles report the radio as unsupported.
    #[default]
    None,
    /// The BlueZ daemon over D-Bus. Needs the agent's `bluetooth` feature.
    Bluez,
}

/// Radio selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioSettings {
    /// Stack to open.
    pub backend: RadioBackend,
    /// Adapter name such as `hci0`. The default adapter when unset.
    pub adapter: Option<String>,
}

/// Components whose log level can be set on their own, with the tracing
/// target each one logs under.
pub const LOG_COMPONENTS: [(&str, &str); 9] = [
    ("sampler", "homebound_core::sampler"),
    ("scanner", "homebound_core::scanner"),
    ("advertiser", "homebound_core::advertiser"),
    ("coordinator", "homebound_core::coordinator"),
    ("geofence", "homebound_core::geofence"),
    ("outbox", "homebound_core::outbox"),
    ("transport", "homebound_agent::http"),
    ("platform", "homebound_agent::platform"),
    ("api", "homebound_agent::api"),
];

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Level for everything without a component override.
    pub level: String,
    /// Directory for the rolling JSON files in production. Defaults to
    /// `logs` under the data directory.
    pub directory: Option<PathBuf>,
    /// Per-component levels, keyed by the names in [`LOG_COMPONENTS`].
    pub components: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            components: BTreeMap::new(),
        }
    }
}

impl LoggingSettings {
    /// Tracing target of a component name.
    #[must_use]
    pub fn target_for(component: &str) -> Option<&'static str> {
        LOG_COMPONENTS
            .iter()
            .find(|(name, _)| *name == component)
            .map(|(_, target)| *target)
    }
}

impl AgentConfig {
    /// Loads configuration from `path` (or the default location) plus
    /// environment overrides, then validates it.
    ///
    /// A missing default file is not an error; a missing explicit file is.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] for a missing explicit path,
    /// [`ConfigError::LoadError`] for unreadable input and a validation error
    /// for out-of-range values.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let (file, required) = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.to_path_buf()));
                }
                (path.to_path_buf(), true)
            }
            None => (default_config_path(), false),
        };

        let config: Self = Config::builder()
            .add_source(
                File::from(file.as_path())
                    .format(FileFormat::Toml)
                    .required(required),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let write_err = |source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(write_err)
    }

    /// Checks every field and reports all problems at once.
    ///
    /// # Errors
    ///
    /// Returns the single failing field, or all of them.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut check = |ok: bool, field: &str, message: String| {
            if !ok {
                errors.push(ConfigError::ValidationError {
                    field: field.to_string(),
                    message,
                });
            }
        };

        check(
            self.server.port != 0,
            "server.port",
            "must be between 1 and 65535".to_string(),
        );
        check(
            !self.server.host.trim().is_empty(),
            "server.host",
            "must not be empty".to_string(),
        );
        check(
            self.backend.timeout_secs > 0,
            "backend.timeout_secs",
            "must be positive".to_string(),
        );
        if let Some(host) = &self.backend.api_host {
            check(
                host.starts_with("http://") || host.starts_with("https://"),
                "backend.api_host",
                format!("must be an http(s) URL (got {host:?})"),
            );
        }
        let interval = Duration::from_secs(self.sampler.check_interval_secs);
        check(
            (MIN_CHECK_INTERVAL..=MAX_CHECK_INTERVAL).contains(&interval),
            "sampler.check_interval_secs",
            format!(
                "must be between {} and {} seconds",
                MIN_CHECK_INTERVAL.as_secs(),
                MAX_CHECK_INTERVAL.as_secs()
            ),
        );
        check(
            self.sampler.acceptable_accuracy.is_finite() && self.sampler.acceptable_accuracy > 0.0,
            "sampler.acceptable_accuracy",
            "must be a positive number of metres".to_string(),
        );
        check(
            self.sampler.max_settle_retries > 0,
            "sampler.max_settle_retries",
            "must be at least 1".to_string(),
        );
        check(
            self.scanner.rssi_min <= self.scanner.rssi_max,
            "scanner.rssi_min",
            format!(
                "must not exceed scanner.rssi_max ({})",
                self.scanner.rssi_max
            ),
        );
        check(
            self.location.max_region_radius.is_finite() && self.location.max_region_radius > 0.0,
            "location.max_region_radius",
            "must be a positive number of metres".to_string(),
        );
        check(
            LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()),
            "logging.level",
            format!("must be one of {} (got {:?})", LOG_LEVELS.join(", "), self.logging.level),
        );
        for (component, level) in &self.logging.components {
            check(
                LoggingSettings::target_for(component).is_some(),
                "logging.components",
                format!("unknown component {component:?}"),
            );
            check(
                LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()),
                "logging.components",
                format!("{component}: must be a log level (got {level:?})"),
            );
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

/// Default configuration file path.
#[must_use]
pub fn default_config_path() -> PathBuf {
    // Installed agent: /etc/homebound/config.toml
    // Elsewhere: the platform config directory
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/homebound/config.toml")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "homebound").map_or_else(
            || PathBuf::from("homebound.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }
}

/// Default data directory.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/lib/homebound")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "homebound").map_or_else(
            || PathBuf::from("homebound-data"),
            |dirs| dirs.data_dir().to_path_buf(),
        )
    }
}
