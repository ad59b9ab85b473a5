//! Unified error handling for Hwtherm
//!
//! This crate provides the single error type used across the sensor engine,
//! the thermal zone controller and the daemon. It uses thiserror for the
//! Display and Error trait impls.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Result type alias using ThermalError
pub type Result<T> = std::result::Result<T, ThermalError>;

/// Unified error type for all Hwtherm operations
#[derive(thiserror::Error, Debug)]
pub enum ThermalError {
    // ============================================================================
    // Discovery and Resolution Errors
    // ============================================================================
    #[error("Hwmon discovery failed under {path}: {reason}")]
    Discovery { path: PathBuf, reason: String },

    #[error("Hwmon discovery under {path} exceeded its {timeout:?} deadline")]
    DiscoveryTimeout { path: PathBuf, timeout: Duration },

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Sensor {sensor} not found on device {device}")]
    SensorNotFound { device: String, sensor: String },

    #[error("Attribute {attribute} not supported by sensor {sensor}")]
    AttributeNotSupported { sensor: String, attribute: String },

    // ============================================================================
    // Sysfs I/O Errors
    // ============================================================================
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("Failed to read {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Failed to write {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("Read from {path} timed out after {timeout:?}")]
    ReadTimeout { path: PathBuf, timeout: Duration },

    #[error("Write to {path} timed out after {timeout:?}")]
    WriteTimeout { path: PathBuf, timeout: Duration },

    #[error("Sensor {0} is not writable")]
    NotWritable(String),

    // ============================================================================
    // Value Errors
    // ============================================================================
    #[error("Failed to parse '{raw}' from {path}: {reason}")]
    ValueParse {
        path: PathBuf,
        raw: String,
        reason: String,
    },

    #[error("Value {value} out of range [{min}, {max}]")]
    ValueOutOfRange { value: f64, min: f64, max: f64 },

    #[error("Value kind mismatch: expected {expected}, found {found}")]
    ValueKindMismatch {
        expected: &'static str,
        found: &'static str,
    },

    // ============================================================================
    // Retry and Cancellation
    // ============================================================================
    #[error("Gave up after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<ThermalError>,
    },

    #[error("Operation canceled")]
    OperationCanceled,

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ============================================================================
    // Thermal Control
    // ============================================================================
    #[error("All {failed} sensors of zone {zone} failed to read")]
    AllSensorsFailed { zone: String, failed: usize },

    #[error("Cooling control failed for zone {zone}: {reason}")]
    CoolingControl { zone: String, reason: String },

    /// Escalation signal, not a fault: cooling was already forced to 100%.
    #[error("Critical temperature exceeded in zone {zone}: {temperature:.1}°C >= {threshold:.1}°C")]
    CriticalTemperature {
        zone: String,
        temperature: f64,
        threshold: f64,
    },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl ThermalError {
    /// Create a read error
    pub fn read(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Read {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a write error
    pub fn write(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Write {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// True for the critical-temperature escalation signal.
    ///
    /// Callers must route this to the lifecycle collaborator instead of
    /// treating it as a failed operation.
    pub fn is_critical_signal(&self) -> bool {
        matches!(self, Self::CriticalTemperature { .. })
    }

    /// Whether another attempt of the same I/O operation may succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::OperationCanceled
                | Self::PermissionDenied { .. }
                | Self::NotWritable(_)
                | Self::ValueOutOfRange { .. }
                | Self::ValueKindMismatch { .. }
                | Self::InvalidConfig { .. }
                | Self::AttributeNotSupported { .. }
        )
    }

    /// Innermost cause, looking through `RetryExhausted` wrappers
    pub fn root_cause(&self) -> &ThermalError {
        match self {
            Self::RetryExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
