//! Data types, values and configuration
//!
//! Contains the typed value model, the hwmon attribute naming rules, the
//! discovered device tree and the configuration types.

pub mod attribute;
mod config;
mod types;
mod value;

pub use attribute::{attribute_filename, parse_attribute_filename, AttributeKind, ParsedAttribute};
pub use config::{
    CoolingDeviceConfig, DiscoveryConfig, IoConfig, SensorConfig, SensorSelector, ThermalConfig,
    ZoneConfig,
};
pub use types::{
    CoolingKind, CoolingStatus, Device, ErrorRecord, SensorInfo, SensorKey, SensorReading,
};
pub use value::{SensorKind, Value};
