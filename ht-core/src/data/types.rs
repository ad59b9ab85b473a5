//! Core data types for Hwtherm
//!
//! Devices and sensors as discovered under the hwmon tree, plus the
//! reading records exposed to monitoring.

use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::data::attribute::AttributeKind;
use crate::data::value::{SensorKind, Value};

/// Identity of one physical sensor channel on a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SensorKey {
    pub kind: SensorKind,
    pub index: u32,
}

impl SensorKey {
    pub fn new(kind: SensorKind, index: u32) -> Self {
        Self { kind, index }
    }
}

impl fmt::Display for SensorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind.prefix() {
            Some(prefix) => write!(f, "{}{}", prefix, self.index),
            None => write!(f, "{}{}", self.kind, self.index),
        }
    }
}

/// One sensor channel with the attribute files found for it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorInfo {
    /// Channel name such as `temp1` or `pwm2`
    pub name: String,
    /// Trimmed contents of the `_label` file, if any
    pub label: Option<String>,
    pub index: u32,
    pub kind: SensorKind,
    /// Only attributes whose files exist
    pub attributes: BTreeMap<AttributeKind, PathBuf>,
    /// At least one writable attribute passed an open-for-write probe
    pub writable: bool,
    pub device_path: PathBuf,
}

impl SensorInfo {
    pub fn key(&self) -> SensorKey {
        SensorKey::new(self.kind, self.index)
    }

    pub fn attribute_path(&self, attribute: AttributeKind) -> Option<&Path> {
        self.attributes.get(&attribute).map(PathBuf::as_path)
    }

    pub fn has_attribute(&self, attribute: AttributeKind) -> bool {
        self.attributes.contains_key(&attribute)
    }

    /// Label when present, channel name otherwise
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

/// An hwmon device directory (`hwmonN`)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    /// Driver name from the `name` file
    pub name: String,
    pub path: PathBuf,
    /// Directory name, e.g. `hwmon3`
    pub id: String,
    pub numeric_id: u32,
    #[serde(serialize_with = "serialize_sensors")]
    pub sensors: BTreeMap<SensorKey, SensorInfo>,
    pub last_scan: SystemTime,
}

// JSON object keys must be strings, so the sensor map goes out as a list
fn serialize_sensors<S>(
    sensors: &BTreeMap<SensorKey, SensorInfo>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_seq(sensors.values())
}

impl Device {
    pub fn sensor(&self, kind: SensorKind, index: u32) -> Option<&SensorInfo> {
        self.sensors.get(&SensorKey::new(kind, index))
    }

    pub fn sensors_of_kind(&self, kind: SensorKind) -> impl Iterator<Item = &SensorInfo> {
        self.sensors.values().filter(move |s| s.kind == kind)
    }

    /// First sensor, in `(kind, index)` order, whose label matches exactly
    pub fn find_by_label(&self, label: &str) -> Option<&SensorInfo> {
        let label = label.trim();
        self.sensors
            .values()
            .find(|s| s.label.as_deref() == Some(label))
    }

    /// PWM channels that expose the bare duty-cycle file
    pub fn pwm_outputs(&self) -> impl Iterator<Item = &SensorInfo> {
        self.sensors_of_kind(SensorKind::Pwm)
            .filter(|s| s.has_attribute(AttributeKind::Input))
    }
}

/// What a cooling actuator drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoolingKind {
    #[default]
    Fan,
    Pump,
    Other,
}

/// Last observed accessibility of a cooling actuator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoolingStatus {
    Enabled,
    NotPresent,
    Error,
}

/// A failure kept for inspection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub at: SystemTime,
}

impl ErrorRecord {
    pub fn now(error: &impl fmt::Display) -> Self {
        Self {
            message: error.to_string(),
            at: SystemTime::now(),
        }
    }
}

/// Last known state of one configured sensor
#[derive(Debug, Clone, Serialize)]
pub struct SensorReading {
    pub name: String,
    pub kind: SensorKind,
    pub path: PathBuf,
    pub value: Option<Value>,
    pub last_read: Option<SystemTime>,
    pub last_error: Option<ErrorRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_with(sensors: Vec<SensorInfo>) -> Device {
        Device {
            name: "nct6775".to_string(),
            path: PathBuf::from("/sys/class/hwmon/hwmon2"),
            id: "hwmon2".to_string(),
            numeric_id: 2,
            sensors: sensors.into_iter().map(|s| (s.key(), s)).collect(),
            last_scan: SystemTime::UNIX_EPOCH,
        }
    }

    fn sensor(kind: SensorKind, index: u32, label: Option<&str>) -> SensorInfo {
        let mut attributes = BTreeMap::new();
        attributes.insert(AttributeKind::Input, PathBuf::from(format!("/x/{}{}", kind, index)));
        SensorInfo {
            name: SensorKey::new(kind, index).to_string(),
            label: label.map(str::to_string),
            index,
            kind,
            attributes,
            writable: false,
            device_path: PathBuf::from("/sys/class/hwmon/hwmon2"),
        }
    }

    #[test]
    fn test_key_display_uses_prefix() {
        assert_eq!(SensorKey::new(SensorKind::Voltage, 3).to_string(), "in3");
        assert_eq!(SensorKey::new(SensorKind::Pwm, 1).to_string(), "pwm1");
    }

    #[test]
    fn test_find_by_label_first_in_key_order() {
        let device = device_with(vec![
            sensor(SensorKind::Temperature, 2, Some("CPU")),
            sensor(SensorKind::Temperature, 1, Some("CPU")),
            sensor(SensorKind::Fan, 1, Some("CPU Fan")),
        ]);
        assert_eq!(device.find_by_label("CPU").map(|s| s.index), Some(1));
        assert_eq!(device.find_by_label(" CPU Fan ").map(|s| s.kind), Some(SensorKind::Fan));
        assert!(device.find_by_label("cpu").is_none());
    }

    #[test]
    fn test_pwm_outputs_and_json() {
        let device = device_with(vec![
            sensor(SensorKind::Pwm, 1, None),
            sensor(SensorKind::Temperature, 1, None),
        ]);
        assert_eq!(device.pwm_outputs().count(), 1);

        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["sensors"].as_array().map(Vec::len), Some(2));
        assert_eq!(json["sensors"][0]["kind"], "temperature");
    }
}
