//! Hardware interaction modules
//!
//! Contains all low-level hwmon access: the sysfs seam, deadline-bound I/O,
//! discovery, sensor handles and cooling devices.

mod cooling;
mod discovery;
mod io;
mod sensor;
mod sysfs;

pub use cooling::{cooling_outputs, CoolingDevice, CoolingDeviceInfo, CoolingSnapshot};
pub use discovery::{scan_device, scan_hwmon_tree, Discoverer, ResolvedSensor};
pub use io::{with_retry, Cancellation, IoContext, RetryPolicy};
pub use sensor::Sensor;
pub use sysfs::{DirEntryInfo, RealSysfs, SysfsIo};
