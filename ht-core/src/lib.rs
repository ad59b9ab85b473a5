//! Hwtherm Core Library
//!
//! Hardware monitoring and closed-loop thermal control for BMC firmware.
//!
//! # Features
//!
//! - **Discovery**: Enumeration of `/sys/class/hwmon` devices and their sensor attributes, cached with a TTL
//! - **Typed Values**: Tagged physical quantities with unit conversion and validity bounds
//! - **Sensor Handles**: Validated, retried, deadline-bound reads and writes
//! - **Thermal Zones**: PID control over cooling devices with warning and critical escalation
//!
//! # Module Structure
//!
//! - `data/` - Values, attribute naming, device tree and configuration types
//! - `hw/` - Sysfs access, discovery, sensors and cooling devices
//! - `engine/` - PID controller, zone loop and manager
//!
//! # Example
//!
//! ```no_run
//! use ht_core::{ThermalConfig, ThermalManager};
//!
//! # async fn run() -> ht_core::Result<()> {
//! let config = ThermalConfig::load("/etc/hwtherm/config.json".as_ref())?;
//! let mut manager = ThermalManager::from_config(config).await?;
//! manager.start();
//! let snapshot = manager.snapshot().await?;
//! println!("{} zones", snapshot.zones.len());
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

// Grouped modules
pub mod data;
pub mod engine;
pub mod hw;

// Standalone modules
pub mod constants;

/// Error types shared with the daemon
pub mod error {
    pub use ht_error::{Result, ThermalError};
}

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export primary types from data/
pub use data::{
    attribute_filename, parse_attribute_filename, AttributeKind, CoolingDeviceConfig,
    CoolingKind, CoolingStatus, Device, DiscoveryConfig, ErrorRecord, IoConfig, SensorConfig,
    SensorInfo, SensorKey, SensorKind, SensorReading, SensorSelector, ThermalConfig, Value,
    ZoneConfig,
};

// Re-export error types
pub use error::{Result, ThermalError};

// Re-export engine types
pub use engine::{
    AntiWindup, CriticalAlert, PidAction, PidConfig, PidController, PidState, ThermalManager,
    ThermalSnapshot, ThermalZone, ThresholdStatus, TickReport, ZonePhase, ZoneSnapshot,
};

// Re-export hardware types from hw/
pub use hw::{
    cooling_outputs, Cancellation, CoolingDevice, CoolingDeviceInfo, CoolingSnapshot, Discoverer,
    IoContext, RealSysfs, ResolvedSensor, RetryPolicy, Sensor, SysfsIo,
};
