//! Configuration management
//!
//! Serde-derived configuration for discovery, sensor I/O, cooling devices
//! and thermal zones. Durations are given in milliseconds (`*_ms` fields).
//! Everything is validated by [`ThermalConfig::validate`] before any
//! hardware is touched.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{discovery, io, paths, pwm};
use crate::data::attribute::AttributeKind;
use crate::data::types::CoolingKind;
use crate::data::value::SensorKind;
use crate::engine::PidConfig;
use crate::error::{Result, ThermalError};

fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

/// Hwmon tree scanning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub base_path: PathBuf,
    pub cache_ttl_ms: u64,
    pub timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from(paths::HWMON_BASE),
            cache_ttl_ms: duration_ms(discovery::CACHE_TTL),
            timeout_ms: duration_ms(discovery::TIMEOUT),
        }
    }
}

impl DiscoveryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(ThermalError::invalid_config(
                "discovery.timeout_ms",
                "timeout must be greater than zero",
            ));
        }
        if self.base_path.as_os_str().is_empty() {
            return Err(ThermalError::invalid_config(
                "discovery.base_path",
                "base path cannot be empty",
            ));
        }
        Ok(())
    }
}

/// Default retry and timeout discipline for sysfs I/O
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub timeout_ms: u64,
    pub max_concurrent_reads: usize,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            retry_count: io::RETRY_COUNT,
            retry_delay_ms: duration_ms(io::RETRY_DELAY),
            timeout_ms: duration_ms(io::TIMEOUT),
            max_concurrent_reads: io::MAX_CONCURRENT_READS,
        }
    }
}

impl IoConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(ThermalError::invalid_config(
                "io.timeout_ms",
                "timeout must be greater than zero",
            ));
        }
        if self.max_concurrent_reads == 0 {
            return Err(ThermalError::invalid_config(
                "io.max_concurrent_reads",
                "at least one concurrent operation is required",
            ));
        }
        Ok(())
    }
}

/// How a configured sensor is located on its device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorSelector {
    /// Exact match on the trimmed `_label` contents
    Label(String),
    Index { kind: SensorKind, index: u32 },
}

fn default_true() -> bool {
    true
}

/// One sensor the controller reads or writes
///
/// Identified either by `label` or by `kind` plus `index` on the hwmon device
/// whose `name` file equals `device`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub name: String,
    pub device: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SensorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default)]
    pub attribute: AttributeKind,
    #[serde(default = "default_true")]
    pub validate: bool,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    /// Serve reads from memory while younger than this
    #[serde(default)]
    pub cache_ttl_ms: Option<u64>,
    #[serde(default)]
    pub writable: bool,
    #[serde(default)]
    pub retry_count: Option<u32>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl SensorConfig {
    /// Sensor selected by label
    pub fn by_label(name: &str, device: &str, label: &str) -> Self {
        Self::base(name, device, Some(label.to_string()), None, None)
    }

    /// Sensor selected by kind and channel index
    pub fn by_index(name: &str, device: &str, kind: SensorKind, index: u32) -> Self {
        Self::base(name, device, None, Some(kind), Some(index))
    }

    fn base(
        name: &str,
        device: &str,
        label: Option<String>,
        kind: Option<SensorKind>,
        index: Option<u32>,
    ) -> Self {
        Self {
            name: name.to_string(),
            device: device.to_string(),
            label,
            kind,
            index,
            attribute: AttributeKind::Input,
            validate: true,
            min: None,
            max: None,
            cache_ttl_ms: None,
            writable: false,
            retry_count: None,
            retry_delay_ms: None,
            timeout_ms: None,
        }
    }

    pub fn with_attribute(mut self, attribute: AttributeKind) -> Self {
        self.attribute = attribute;
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_ms = Some(duration_ms(ttl));
        self
    }

    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_ms.map(Duration::from_millis)
    }

    pub fn selector(&self) -> Result<SensorSelector> {
        let field = format!("sensors.{}", self.name);
        match (&self.label, self.kind, self.index) {
            (Some(label), None, None) => {
                let label = label.trim();
                if label.is_empty() {
                    return Err(ThermalError::invalid_config(
                        format!("{}.label", field),
                        "label cannot be empty",
                    ));
                }
                Ok(SensorSelector::Label(label.to_string()))
            }
            (None, Some(kind), Some(index)) => {
                if kind.prefix().is_none() {
                    return Err(ThermalError::invalid_config(
                        format!("{}.kind", field),
                        format!("{} sensors have no hwmon attributes", kind),
                    ));
                }
                Ok(SensorSelector::Index { kind, index })
            }
            _ => Err(ThermalError::invalid_config(
                field,
                "set either label, or kind together with index",
            )),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ThermalError::invalid_config("sensors.name", "name cannot be empty"));
        }
        let field = format!("sensors.{}", self.name);
        if self.device.trim().is_empty() {
            return Err(ThermalError::invalid_config(
                format!("{}.device", field),
                "device cannot be empty",
            ));
        }
        self.selector()?;
        for (name, bound) in [("min", self.min), ("max", self.max)] {
            if let Some(bound) = bound {
                if !bound.is_finite() {
                    return Err(ThermalError::invalid_config(
                        format!("{}.{}", field, name),
                        "bound must be finite",
                    ));
                }
            }
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(ThermalError::invalid_config(
                    format!("{}.min", field),
                    format!("min ({}) exceeds max ({})", min, max),
                ));
            }
        }
        if self.timeout_ms == Some(0) {
            return Err(ThermalError::invalid_config(
                format!("{}.timeout_ms", field),
                "timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}

fn default_min_power() -> i64 {
    pwm::MIN_VALUE as i64
}

fn default_max_power() -> i64 {
    pwm::MAX_VALUE as i64
}

/// An explicitly configured actuator
///
/// Discovered PWM outputs are available as `<device>/pwmN` without any
/// entry here; use this for non-standard raw ranges or paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoolingDeviceConfig {
    pub name: String,
    /// The writable raw value file, e.g. `.../hwmon2/pwm1`
    pub path: PathBuf,
    #[serde(default)]
    pub kind: CoolingKind,
    #[serde(default = "default_min_power")]
    pub min_power: i64,
    #[serde(default = "default_max_power")]
    pub max_power: i64,
}

impl CoolingDeviceConfig {
    pub fn new(name: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            path: path.into(),
            kind: CoolingKind::default(),
            min_power: default_min_power(),
            max_power: default_max_power(),
        }
    }

    pub fn with_power_range(mut self, min: i64, max: i64) -> Self {
        self.min_power = min;
        self.max_power = max;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let field = format!("cooling_devices.{}", self.name);
        if self.name.trim().is_empty() {
            return Err(ThermalError::invalid_config(
                "cooling_devices.name",
                "name cannot be empty",
            ));
        }
        if !self.path.is_absolute() {
            return Err(ThermalError::invalid_config(
                format!("{}.path", field),
                format!("{} is not an absolute path", self.path.display()),
            ));
        }
        if self.min_power < 0 || self.min_power >= self.max_power {
            return Err(ThermalError::invalid_config(
                format!("{}.min_power", field),
                format!(
                    "raw range [{}, {}] must be non-negative and non-empty",
                    self.min_power, self.max_power
                ),
            ));
        }
        Ok(())
    }
}

/// One control loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    /// Configured sensor names, or absolute paths of temperature inputs
    pub sensor_paths: Vec<String>,
    /// Configured cooling device names or discovered `<device>/pwmN` outputs
    pub cooling_devices: Vec<String>,
    pub target_temp: f64,
    pub warning_temp: f64,
    pub critical_temp: f64,
    pub pid: PidConfig,
}

impl ZoneConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ThermalError::invalid_config("zones.name", "name cannot be empty"));
        }
        let field = format!("zones.{}", self.name);
        if self.sensor_paths.is_empty() {
            return Err(ThermalError::invalid_config(
                format!("{}.sensor_paths", field),
                "at least one sensor is required",
            ));
        }
        if self.cooling_devices.is_empty() {
            return Err(ThermalError::invalid_config(
                format!("{}.cooling_devices", field),
                "at least one cooling device is required",
            ));
        }
        for (name, temp) in [
            ("target_temp", self.target_temp),
            ("warning_temp", self.warning_temp),
            ("critical_temp", self.critical_temp),
        ] {
            if !temp.is_finite() {
                return Err(ThermalError::invalid_config(
                    format!("{}.{}", field, name),
                    format!("temperature must be finite, got {}", temp),
                ));
            }
        }
        if self.warning_temp > self.critical_temp {
            return Err(ThermalError::invalid_config(
                format!("{}.warning_temp", field),
                format!(
                    "warning ({}) exceeds critical ({})",
                    self.warning_temp, self.critical_temp
                ),
            ));
        }
        self.pid.validate(&format!("{}.pid", field))
    }
}

/// Complete controller configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThermalConfig {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub io: IoConfig,
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
    #[serde(default)]
    pub cooling_devices: Vec<CoolingDeviceConfig>,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
}

impl ThermalConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn sensor(&self, name: &str) -> Option<&SensorConfig> {
        self.sensors.iter().find(|s| s.name == name)
    }

    pub fn cooling_device(&self, name: &str) -> Option<&CoolingDeviceConfig> {
        self.cooling_devices.iter().find(|c| c.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        self.discovery.validate()?;
        self.io.validate()?;

        let mut seen = HashSet::new();
        for sensor in &self.sensors {
            sensor.validate()?;
            if !seen.insert(sensor.name.as_str()) {
                return Err(ThermalError::invalid_config(
                    "sensors.name",
                    format!("duplicate sensor name '{}'", sensor.name),
                ));
            }
        }

        let mut seen = HashSet::new();
        for device in &self.cooling_devices {
            device.validate()?;
            if !seen.insert(device.name.as_str()) {
                return Err(ThermalError::invalid_config(
                    "cooling_devices.name",
                    format!("duplicate cooling device name '{}'", device.name),
                ));
            }
        }

        let mut seen = HashSet::new();
        // Cooling output name -> owning zone
        let mut owners: HashMap<&str, &str> = HashMap::new();
        for zone in &self.zones {
            zone.validate()?;
            if !seen.insert(zone.name.as_str()) {
                return Err(ThermalError::invalid_config(
                    "zones.name",
                    format!("duplicate zone name '{}'", zone.name),
                ));
            }
            for entry in &zone.sensor_paths {
                let field = format!("zones.{}.sensor_paths", zone.name);
                match self.sensor(entry) {
                    Some(sensor) => {
                        if let Some(kind) = sensor.kind.filter(|k| *k != SensorKind::Temperature) {
                            return Err(ThermalError::invalid_config(
                                field,
                                format!("'{}' is a {} sensor, not temperature", entry, kind),
                            ));
                        }
                    }
                    None if Path::new(entry).is_absolute() => {}
                    None => {
                        return Err(ThermalError::invalid_config(
                            field,
                            format!("'{}' is neither a configured sensor nor an absolute path", entry),
                        ));
                    }
                }
            }
            for device in &zone.cooling_devices {
                if let Some(owner) = owners.insert(device.as_str(), zone.name.as_str()) {
                    return Err(ThermalError::invalid_config(
                        format!("zones.{}.cooling_devices", zone.name),
                        format!("'{}' is already driven by zone '{}'", device, owner),
                    ));
                }
            }
        }
        Ok(())
    }
}
