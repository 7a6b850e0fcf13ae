//! Unified error types for the homebound core library.
//!
//! This module provides a unified error type [`HomeboundError`] that covers all
//! failure modes across the pipeline. Each module also has its own specific
//! error type ([`OutboxError`](crate::outbox::OutboxError),
//! [`SettingsError`](crate::settings::SettingsError),
//! [`TransportError`](crate::transport::TransportError),
//! [`ConfigError`](crate::config::ConfigError)) for internal use.
//!
//! # Design Principles
//!
//! - **Specific variants**: Each error variant captures exactly one failure mode
//! - **Actionable messages**: Error messages guide users toward resolution
//! - **Absorbed at the boundary**: Radio and single-peer failures are logged by
//!   the component that saw them; only coordinator decisions surface
//!
//! # Example
//!
//! ```rust
//! use homebound_core::error::{HomeboundError, Result};
//! use std::path::PathBuf;
//!
//! fn load_settings(path: &PathBuf) -> Result<()> {
//!     if !path.exists() {
//!         return Err(HomeboundError::ConfigNotFound(path.clone()));
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all homebound operations.
#[derive(Debug, Error)]
pub enum HomeboundError {
    // =========================================================================
    // RADIO ERRORS
    // =========================================================================
    /// The Bluetooth radio is not authorized for this process.
    #[error("Bluetooth access is not authorized. Grant Bluetooth permission and restart tracking.")]
    RadioUnauthorized,

    /// The Bluetooth radio exists but is powered off.
    #[error("Bluetooth radio is powered off. Turn Bluetooth on to resume proximity tracking.")]
    RadioPoweredOff,

    /// This platform has no usable Bluetooth LE radio.
    #[error("Bluetooth LE is not supported on this device")]
    RadioUnsupported,

    /// A single-peer radio operation failed.
    #[error("Radio operation failed: {0}")]
    RadioOperationFailed(String),

    // =========================================================================
    // LOCATION ERRORS
    // =========================================================================
    /// Location services are denied for this process.
    #[error("Location access is denied. Enable location services to monitor the quarantine zone.")]
    LocationDenied,

    /// The location provider reported an error.
    #[error("Location provider failed: {0}")]
    LocationProviderFailed(String),

    // =========================================================================
    // NETWORK ERRORS
    // =========================================================================
    /// The backend request could not be sent or timed out.
    #[error("Backend request failed: {0}")]
    TransportFailed(String),

    /// The backend answered with a non-success status.
    #[error("Backend rejected {endpoint} with HTTP {status}")]
    TransportRejected {
        /// Endpoint path that was called.
        endpoint: String,
        /// HTTP status returned.
        status: u16,
    },

    // =========================================================================
    // QUARANTINE ERRORS
    // =========================================================================
    /// An operation required an active quarantine.
    #[error("No quarantine is active")]
    QuarantineInactive,

    /// The provided quarantine zone is not usable.
    #[error("Invalid quarantine zone: {0}")]
    InvalidZone(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading data.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for homebound operations.
pub type Result<T> = std::result::Result<T, HomeboundError>;

impl HomeboundError {
    /// Returns `true` if this error is related to the Bluetooth radio.
    #[inline]
    #[must_use]
    pub fn is_radio_error(&self) -> bool {
        matches!(
            self,
            Self::RadioUnauthorized
                | Self::RadioPoweredOff
                | Self::RadioUnsupported
                | Self::RadioOperationFailed(_)
        )
    }

    /// Returns `true` if the user has to change a system permission.
    #[inline]
    #[must_use]
    pub fn is_permission_error(&self) -> bool {
        matches!(self, Self::RadioUnauthorized | Self::LocationDenied)
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub fn is_io_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::IoError(_))
    }

    /// Returns `true` if retrying later may succeed without user intervention.
    ///
    /// Batch uploads that fail with a transient error stay in the outbox and
    /// are retried on the next flush window.
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransportFailed(_)
                | Self::TransportRejected { .. }
                | Self::RadioPoweredOff
                | Self::RadioOperationFailed(_)
                | Self::LocationProviderFailed(_)
        )
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::InvalidZone(_) => 400,
            Self::QuarantineInactive => 409,
            Self::ConfigNotFound(_) => 404,
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,
            Self::TransportFailed(_) | Self::TransportRejected { .. } => 502,
            Self::RadioUnauthorized
            | Self::RadioPoweredOff
            | Self::RadioUnsupported
            | Self::RadioOperationFailed(_)
            | Self::LocationDenied
            | Self::LocationProviderFailed(_) => 503,
            Self::PersistenceError(_) | Self::IoError(_) => 500,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RadioUnauthorized => "RADIO_UNAUTHORIZED",
            Self::RadioPoweredOff => "RADIO_POWERED_OFF",
            Self::RadioUnsupported => "RADIO_UNSUPPORTED",
            Self::RadioOperationFailed(_) => "RADIO_OPERATION_FAILED",
            Self::LocationDenied => "LOCATION_DENIED",
            Self::LocationProviderFailed(_) => "LOCATION_PROVIDER_FAILED",
            Self::TransportFailed(_) => "TRANSPORT_FAILED",
            Self::TransportRejected { .. } => "TRANSPORT_REJECTED",
            Self::QuarantineInactive => "QUARANTINE_INACTIVE",
            Self::InvalidZone(_) => "INVALID_ZONE",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for HomeboundError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::LoadError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {source}", path.display()))
            }
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::settings::SettingsError> for HomeboundError {
    fn from(err: crate::settings::SettingsError) -> Self {
        use crate::settings::SettingsError;
        match err {
            SettingsError::ReadError { path, source } => {
                Self::PersistenceError(format!("Failed to read {}: {source}", path.display()))
            }
            SettingsError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {source}", path.display()))
            }
            SettingsError::ParseError { path, source } => {
                Self::PersistenceError(format!("Failed to parse {}: {source}", path.display()))
            }
            SettingsError::SerializeError(e) => Self::PersistenceError(e.to_string()),
        }
    }
}

impl From<crate::outbox::OutboxError> for HomeboundError {
    fn from(err: crate::outbox::OutboxError) -> Self {
        use crate::outbox::OutboxError;
        match err {
            OutboxError::Io { path, source } => {
                Self::PersistenceError(format!("Outbox {}: {source}", path.display()))
            }
            OutboxError::Encode(e) => Self::PersistenceError(e.to_string()),
        }
    }
}

impl From<crate::transport::TransportError> for HomeboundError {
    fn from(err: crate::transport::TransportError) -> Self {
        use crate::transport::TransportError;
        match err {
            TransportError::Request(message) => Self::TransportFailed(message),
            TransportError::Rejected { endpoint, status } => {
                Self::TransportRejected { endpoint, status }
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
