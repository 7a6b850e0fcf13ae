//! Remotely tunable knobs with compiled-in fallbacks.
//!
//! Lookup is two-tier: the [`RemoteConfigProvider`] is asked first and, if it
//! has no usable value for a key, the key's [`RemoteConfigKey::default_value`]
//! is used. Providers return `None` for unknown keys and for values of the
//! wrong type.

use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{HomeboundError, Result};

/// Default text shown when the device leaves the quarantine zone.
pub const DEFAULT_QUARANTINE_LEFT_MESSAGE: &str = "Opustili ste zónu domácej karantény. \
Pre ochranu Vášho zdravia a zdravia Vašich blízkych, Vás žiadame o striktné dodržiavanie \
nariadenej karantény.";

/// Keys understood by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteConfigKey {
    /// Minimum distance (metres) from the zone centre counted as leaving it.
    DesiredPositionAccuracy,
    /// Message shown when the zone is left.
    QuarantineLeftMessage,
    /// Minutes between batch uploads.
    BatchSendingFrequency,
    /// Minutes between quarantine location decisions.
    QuarantineLocationPeriodMinutes,
    /// Backend base URL.
    ApiHost,
    /// Accuracy attached to beacon-derived contacts (-1 = unknown).
    IBeaconLocationAccuracy,
    /// Whether to send an area-exit report when the zone is left.
    ReportQuarantineExit,
    /// Whether to upload in-zone location batches.
    ReportQuarantineLocation,
}

/// A value as delivered by a provider or the defaults table.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteValue {
    /// Numeric value.
    Number(f64),
    /// Boolean value.
    Bool(bool),
    /// String value.
    Text(String),
}

impl RemoteConfigKey {
    /// Every key, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::DesiredPositionAccuracy,
        Self::QuarantineLeftMessage,
        Self::BatchSendingFrequency,
        Self::QuarantineLocationPeriodMinutes,
        Self::ApiHost,
        Self::IBeaconLocationAccuracy,
        Self::ReportQuarantineExit,
        Self::ReportQuarantineLocation,
    ];

    /// The name used by the remote source.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::DesiredPositionAccuracy => "desiredPositionAccuracy",
            Self::QuarantineLeftMessage => "quarantineLeftMessage",
            Self::BatchSendingFrequency => "batchSendingFrequency",
            Self::QuarantineLocationPeriodMinutes => "quarantineLocationPeriodMinutes",
            Self::ApiHost => "apiHost",
            Self::IBeaconLocationAccuracy => "iBeaconLocationAccuracy",
            Self::ReportQuarantineExit => "reportQuarantineExit",
            Self::ReportQuarantineLocation => "reportQuarantineLocation",
        }
    }

    /// Compiled-in fallback.
    #[must_use]
    pub fn default_value(self) -> RemoteValue {
        match self {
            Self::DesiredPositionAccuracy => RemoteValue::Number(100.0),
            Self::QuarantineLeftMessage => {
                RemoteValue::Text(DEFAULT_QUARANTINE_LEFT_MESSAGE.to_string())
            }
            Self::BatchSendingFrequency => RemoteValue::Number(60.0),
            Self::QuarantineLocationPeriodMinutes => RemoteValue::Number(5.0),
            Self::ApiHost => {
                RemoteValue::Text("https://covid-gateway.azurewebsites.net".to_string())
            }
            Self::IBeaconLocationAccuracy => RemoteValue::Number(-1.0),
            Self::ReportQuarantineExit | Self::ReportQuarantineLocation => RemoteValue::Bool(true),
        }
    }

    /// Looks a key up by its remote name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.name() == name)
    }
}

/// Source of remote overrides.
pub trait RemoteConfigProvider: Send + Sync {
    /// The remote value for `key`, if the source has one.
    fn value(&self, key: RemoteConfigKey) -> Option<RemoteValue>;
}

/// A provider with no overrides; every lookup falls back to the defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemoteConfig;

impl RemoteConfigProvider for NoRemoteConfig {
    fn value(&self, _key: RemoteConfigKey) -> Option<RemoteValue> {
        None
    }
}

/// A snapshot of remote values, typically fetched as JSON.
#[derive(Debug, Default)]
pub struct RemoteSnapshot {
    values: Map<String, Value>,
}

impl RemoteSnapshot {
    /// Creates a snapshot from a JSON object.
    #[must_use]
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Loads a snapshot from a JSON file containing an object.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a JSON object.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let values = parse_object(&content)?;
        let unknown = unknown_keys(&values);
        if !unknown.is_empty() {
            warn!(path = %path.display(), ?unknown, "remote config has keys the pipeline ignores");
        }
        debug!(path = %path.display(), keys = values.len(), "loaded remote config snapshot");
        Ok(Self::new(values))
    }
}

fn unknown_keys(values: &Map<String, Value>) -> Vec<&str> {
    values
        .keys()
        .map(String::as_str)
        .filter(|name| RemoteConfigKey::from_name(name).is_none())
        .collect()
}

fn parse_object(content: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(HomeboundError::ConfigParseError(
            "remote config must be a JSON object".to_string(),
        )),
        Err(e) => Err(HomeboundError::ConfigParseError(e.to_string())),
    }
}

impl RemoteConfigProvider for RemoteSnapshot {
    fn value(&self, key: RemoteConfigKey) -> Option<RemoteValue> {
        match self.values.get(key.name())? {
            Value::Number(n) => n.as_f64().map(RemoteValue::Number),
            Value::Bool(b) => Some(RemoteValue::Bool(*b)),
            Value::String(s) => Some(RemoteValue::Text(s.clone())),
            other => {
                warn!(key = key.name(), value = %other, "ignoring unsupported remote value");
                None
            }
        }
    }
}

/// Typed two-tier accessor over a provider.
#[derive(Clone)]
pub struct RemoteConfig {
    provider: Arc<dyn RemoteConfigProvider>,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig").finish_non_exhaustive()
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self::new(Arc::new(NoRemoteConfig))
    }
}

impl RemoteConfig {
    /// Wraps a provider.
    #[must_use]
    pub fn new(provider: Arc<dyn RemoteConfigProvider>) -> Self {
        Self { provider }
    }

    /// Numeric value for `key`; numeric strings are accepted.
    #[must_use]
    pub fn double(&self, key: RemoteConfigKey) -> f64 {
        let remote = match self.provider.value(key) {
            Some(RemoteValue::Number(n)) => Some(n),
            Some(RemoteValue::Text(s)) => s.trim().parse().ok(),
            _ => None,
        };
        remote.unwrap_or_else(|| match key.default_value() {
            RemoteValue::Number(n) => n,
            _ => 0.0,
        })
    }

    /// Boolean value for `key`; `"true"`/`"false"` strings are accepted.
    #[must_use]
    pub fn bool(&self, key: RemoteConfigKey) -> bool {
        let remote = match self.provider.value(key) {
            Some(RemoteValue::Bool(b)) => Some(b),
            Some(RemoteValue::Text(s)) => s.trim().parse().ok(),
            _ => None,
        };
        remote.unwrap_or_else(|| matches!(key.default_value(), RemoteValue::Bool(true)))
    }

    /// String value for `key`.
    #[must_use]
    pub fn string(&self, key: RemoteConfigKey) -> String {
        match self.provider.value(key) {
            Some(RemoteValue::Text(s)) => s,
            _ => match key.default_value() {
                RemoteValue::Text(s) => s,
                RemoteValue::Number(n) => n.to_string(),
                RemoteValue::Bool(b) => b.to_string(),
            },
        }
    }
}
