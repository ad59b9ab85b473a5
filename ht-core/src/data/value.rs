//! Typed sensor values
//!
//! Every hwmon reading is stored as the raw integer found in sysfs plus the
//! same quantity converted to its canonical unit.
//!
//! | Kind        | Raw            | Canonical        |
//! |-------------|----------------|------------------|
//! | Temperature | millidegree C  | °C (÷1000)       |
//! | Voltage     | millivolt      | V (÷1000)        |
//! | Fan         | RPM            | RPM              |
//! | Power       | microwatt      | W (÷1 000 000)   |
//! | Current     | milliamp       | A (÷1000)        |
//! | Humidity    | milli-percent  | % (÷1000)        |
//! | Pressure    | pascal         | Pa               |
//! | Pwm         | 0-255          | % (×100/255)     |
//!
//! Kind-specific accessors such as [`Value::as_temperature`] return `None`
//! for any other kind.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;

use crate::constants::{limits, pwm, scale};

/// Physical quantity measured by a sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Temperature,
    Voltage,
    Fan,
    Power,
    Current,
    Humidity,
    Pressure,
    Pwm,
    Generic,
}

impl SensorKind {
    /// Kinds that have an hwmon filename prefix
    pub const HWMON: [SensorKind; 8] = [
        SensorKind::Temperature,
        SensorKind::Voltage,
        SensorKind::Fan,
        SensorKind::Power,
        SensorKind::Current,
        SensorKind::Humidity,
        SensorKind::Pressure,
        SensorKind::Pwm,
    ];

    /// Attribute filename prefix (`temp`, `in`, ...)
    pub fn prefix(self) -> Option<&'static str> {
        match self {
            SensorKind::Temperature => Some("temp"),
            SensorKind::Voltage => Some("in"),
            SensorKind::Fan => Some("fan"),
            SensorKind::Power => Some("power"),
            SensorKind::Current => Some("curr"),
            SensorKind::Humidity => Some("humidity"),
            SensorKind::Pressure => Some("pressure"),
            SensorKind::Pwm => Some("pwm"),
            SensorKind::Generic => None,
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::HWMON.into_iter().find(|kind| kind.prefix() == Some(prefix))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Voltage => "voltage",
            SensorKind::Fan => "fan",
            SensorKind::Power => "power",
            SensorKind::Current => "current",
            SensorKind::Humidity => "humidity",
            SensorKind::Pressure => "pressure",
            SensorKind::Pwm => "pwm",
            SensorKind::Generic => "generic",
        }
    }

    /// Canonical unit suffix for display
    pub fn unit(self) -> &'static str {
        match self {
            SensorKind::Temperature => "°C",
            SensorKind::Voltage => "V",
            SensorKind::Fan => "RPM",
            SensorKind::Power => "W",
            SensorKind::Current => "A",
            SensorKind::Humidity | SensorKind::Pwm => "%",
            SensorKind::Pressure => "Pa",
            SensorKind::Generic => "",
        }
    }

    /// Inclusive validity range in canonical units
    pub fn bounds(self) -> (f64, f64) {
        match self {
            SensorKind::Temperature => (limits::TEMPERATURE_MIN, limits::TEMPERATURE_MAX),
            SensorKind::Voltage => (0.0, limits::VOLTAGE_MAX),
            SensorKind::Fan => (0.0, limits::FAN_RPM_MAX),
            SensorKind::Power => (0.0, limits::POWER_WATTS_MAX),
            SensorKind::Current => (0.0, limits::CURRENT_AMPS_MAX),
            SensorKind::Humidity => (0.0, limits::HUMIDITY_PERCENT_MAX),
            SensorKind::Pressure => (0.0, limits::PRESSURE_PASCALS_MAX),
            SensorKind::Pwm => (0.0, 100.0),
            SensorKind::Generic => (f64::NEG_INFINITY, f64::INFINITY),
        }
    }

    fn divisor(self) -> f64 {
        match self {
            SensorKind::Temperature
            | SensorKind::Voltage
            | SensorKind::Current
            | SensorKind::Humidity => scale::MILLI,
            SensorKind::Power => scale::MICRO,
            SensorKind::Fan | SensorKind::Pressure | SensorKind::Generic => scale::UNIT,
            SensorKind::Pwm => pwm::MAX_VALUE as f64 / 100.0,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reading, tagged with its physical quantity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Value {
    Temperature { raw: i64, celsius: f64 },
    Voltage { raw: i64, volts: f64 },
    Fan { raw: i64, rpm: f64 },
    Power { raw: i64, watts: f64 },
    Current { raw: i64, amps: f64 },
    Humidity { raw: i64, percent: f64 },
    Pressure { raw: i64, pascals: f64 },
    Pwm { raw: i64, percent: f64 },
    Generic { raw: i64 },
}

impl Value {
    /// Build a value from its raw sysfs integer
    pub fn from_raw(kind: SensorKind, raw: i64) -> Self {
        let canonical = raw as f64 / kind.divisor();
        match kind {
            SensorKind::Temperature => Value::Temperature { raw, celsius: canonical },
            SensorKind::Voltage => Value::Voltage { raw, volts: canonical },
            SensorKind::Fan => Value::Fan { raw, rpm: canonical },
            SensorKind::Power => Value::Power { raw, watts: canonical },
            SensorKind::Current => Value::Current { raw, amps: canonical },
            SensorKind::Humidity => Value::Humidity { raw, percent: canonical },
            SensorKind::Pressure => Value::Pressure { raw, pascals: canonical },
            SensorKind::Pwm => Value::Pwm {
                raw,
                percent: pwm::to_percent(raw),
            },
            SensorKind::Generic => Value::Generic { raw },
        }
    }

    /// Build a value from a canonical-unit quantity (e.g. 80.0 °C)
    ///
    /// The raw integer is rounded to the nearest sysfs step.
    pub fn from_canonical(kind: SensorKind, canonical: f64) -> Self {
        let raw = match kind {
            // Not clamped: an out-of-range percentage must fail validation
            SensorKind::Pwm => ((canonical / 100.0) * pwm::MAX_VALUE as f64).round() as i64,
            _ => (canonical * kind.divisor()).round() as i64,
        };
        Self::from_raw(kind, raw)
    }

    /// Parse the contents of a sysfs attribute file
    pub fn parse(kind: SensorKind, raw: &str) -> Result<Self, ParseIntError> {
        raw.trim().parse::<i64>().map(|value| Self::from_raw(kind, value))
    }

    /// Raw integer string as written to sysfs
    pub fn format_raw(&self) -> String {
        self.raw().to_string()
    }

    pub fn kind(&self) -> SensorKind {
        match self {
            Value::Temperature { .. } => SensorKind::Temperature,
            Value::Voltage { .. } => SensorKind::Voltage,
            Value::Fan { .. } => SensorKind::Fan,
            Value::Power { .. } => SensorKind::Power,
            Value::Current { .. } => SensorKind::Current,
            Value::Humidity { .. } => SensorKind::Humidity,
            Value::Pressure { .. } => SensorKind::Pressure,
            Value::Pwm { .. } => SensorKind::Pwm,
            Value::Generic { .. } => SensorKind::Generic,
        }
    }

    pub fn raw(&self) -> i64 {
        match *self {
            Value::Temperature { raw, .. }
            | Value::Voltage { raw, .. }
            | Value::Fan { raw, .. }
            | Value::Power { raw, .. }
            | Value::Current { raw, .. }
            | Value::Humidity { raw, .. }
            | Value::Pressure { raw, .. }
            | Value::Pwm { raw, .. }
            | Value::Generic { raw } => raw,
        }
    }

    /// Quantity in the canonical unit of its kind
    pub fn canonical(&self) -> f64 {
        match *self {
            Value::Temperature { celsius: v, .. }
            | Value::Voltage { volts: v, .. }
            | Value::Fan { rpm: v, .. }
            | Value::Power { watts: v, .. }
            | Value::Current { amps: v, .. }
            | Value::Humidity { percent: v, .. }
            | Value::Pressure { pascals: v, .. }
            | Value::Pwm { percent: v, .. } => v,
            Value::Generic { raw } => raw as f64,
        }
    }

    /// Whether the reading is physically plausible for its kind
    pub fn is_valid(&self) -> bool {
        if let Value::Pwm { raw, .. } = *self {
            return (pwm::MIN_VALUE as i64..=pwm::MAX_VALUE as i64).contains(&raw);
        }
        let (min, max) = self.kind().bounds();
        let value = self.canonical();
        value.is_finite() && value >= min && value <= max
    }

    pub fn as_temperature(&self) -> Option<f64> {
        match *self {
            Value::Temperature { celsius, .. } => Some(celsius),
            _ => None,
        }
    }

    pub fn as_voltage(&self) -> Option<f64> {
        match *self {
            Value::Voltage { volts, .. } => Some(volts),
            _ => None,
        }
    }

    pub fn as_fan_rpm(&self) -> Option<f64> {
        match *self {
            Value::Fan { rpm, .. } => Some(rpm),
            _ => None,
        }
    }

    pub fn as_power(&self) -> Option<f64> {
        match *self {
            Value::Power { watts, .. } => Some(watts),
            _ => None,
        }
    }

    pub fn as_current(&self) -> Option<f64> {
        match *self {
            Value::Current { amps, .. } => Some(amps),
            _ => None,
        }
    }

    pub fn as_humidity(&self) -> Option<f64> {
        match *self {
            Value::Humidity { percent, .. } => Some(percent),
            _ => None,
        }
    }

    pub fn as_pressure(&self) -> Option<f64> {
        match *self {
            Value::Pressure { pascals, .. } => Some(pascals),
            _ => None,
        }
    }

    /// PWM duty cycle in percent
    pub fn as_pwm_percent(&self) -> Option<f64> {
        match *self {
            Value::Pwm { percent, .. } => Some(percent),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Generic { raw } => write!(f, "{}", raw),
            Value::Fan { rpm, .. } => write!(f, "{:.0} RPM", rpm),
            Value::Pressure { pascals, .. } => write!(f, "{:.0} Pa", pascals),
            other => write!(f, "{:.1}{}", other.canonical(), other.kind().unit()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_every_kind() {
        let samples = [
            (SensorKind::Temperature, "45000"),
            (SensorKind::Temperature, "-5250"),
            (SensorKind::Voltage, "12100"),
            (SensorKind::Fan, "1450"),
            (SensorKind::Power, "65000000"),
            (SensorKind::Current, "2300"),
            (SensorKind::Humidity, "41500"),
            (SensorKind::Pressure, "101325"),
            (SensorKind::Pwm, "128"),
            (SensorKind::Generic, "7"),
        ];
        for (kind, raw) in samples {
            let value = Value::parse(kind, raw).unwrap();
            assert_eq!(value.kind(), kind);
            assert_eq!(value.format_raw(), raw, "{} did not round-trip", kind);
        }
    }

    #[test]
    fn test_parse_trims_newline() {
        let value = Value::parse(SensorKind::Temperature, "52000\n").unwrap();
        assert_eq!(value.as_temperature(), Some(52.0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Value::parse(SensorKind::Fan, "n/a").is_err());
        assert!(Value::parse(SensorKind::Fan, "").is_err());
    }

    #[test]
    fn test_unit_conversions() {
        assert_eq!(Value::from_raw(SensorKind::Voltage, 3300).as_voltage(), Some(3.3));
        assert_eq!(Value::from_raw(SensorKind::Power, 1_500_000).as_power(), Some(1.5));
        assert_eq!(Value::from_raw(SensorKind::Current, 250).as_current(), Some(0.25));
        assert_eq!(Value::from_raw(SensorKind::Humidity, 55000).as_humidity(), Some(55.0));
        assert_eq!(Value::from_raw(SensorKind::Pressure, 99000).as_pressure(), Some(99000.0));
        assert_eq!(Value::from_raw(SensorKind::Fan, 900).as_fan_rpm(), Some(900.0));
        assert_eq!(Value::from_raw(SensorKind::Pwm, 255).as_pwm_percent(), Some(100.0));
    }

    #[test]
    fn test_mismatched_accessor_is_none() {
        let voltage = Value::from_raw(SensorKind::Voltage, 12000);
        assert_eq!(voltage.as_temperature(), None);
        assert_eq!(voltage.as_pwm_percent(), None);
    }

    #[test]
    fn test_from_canonical() {
        assert_eq!(Value::from_canonical(SensorKind::Temperature, 80.0).raw(), 80000);
        assert_eq!(Value::from_canonical(SensorKind::Pwm, 50.0).raw(), 128);
        assert_eq!(Value::from_canonical(SensorKind::Power, 2.5).raw(), 2_500_000);
    }

    #[test]
    fn test_validity_bounds() {
        assert!(Value::from_raw(SensorKind::Temperature, 45000).is_valid());
        assert!(!Value::from_raw(SensorKind::Temperature, 250000).is_valid());
        assert!(!Value::from_raw(SensorKind::Temperature, -300000).is_valid());
        assert!(Value::from_raw(SensorKind::Voltage, 50000).is_valid());
        assert!(!Value::from_raw(SensorKind::Voltage, 50001).is_valid());
        assert!(!Value::from_raw(SensorKind::Voltage, -1).is_valid());
        assert!(Value::from_raw(SensorKind::Pwm, 255).is_valid());
        assert!(!Value::from_raw(SensorKind::Pwm, 256).is_valid());
        assert!(Value::from_raw(SensorKind::Generic, i64::MIN).is_valid());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::from_raw(SensorKind::Temperature, 45500).to_string(), "45.5°C");
        assert_eq!(Value::from_raw(SensorKind::Fan, 1200).to_string(), "1200 RPM");
    }

    #[test]
    fn test_kind_prefix_table() {
        assert_eq!(SensorKind::from_prefix("in"), Some(SensorKind::Voltage));
        assert_eq!(SensorKind::from_prefix("curr"), Some(SensorKind::Current));
        assert_eq!(SensorKind::from_prefix("pwm"), Some(SensorKind::Pwm));
        assert_eq!(SensorKind::from_prefix("freq"), None);
        assert_eq!(SensorKind::Generic.prefix(), None);
    }
}
